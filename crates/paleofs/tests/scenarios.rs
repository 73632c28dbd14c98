//! End-to-end scenarios driven entirely through the umbrella crate's public
//! `mount`/`find_embedded_volumes` API (`spec.md` §8).

use paleofs::core::engine::{CreateMode, Engine};
use paleofs::core::error::Error;
use paleofs::core::tracker::{OpenMode, Part};
use paleofs::dos::DosEngine;
use paleofs::io::{ChunkStore, Geometry, MemStore, SectorOrdering};
use paleofs::prodos::ProdosEngine;
use paleofs::{find_embedded_volumes, mount, Mount, MountOptions};

/// Scenario 1/2: format a 140 KB DOS volume through the umbrella's probe,
/// create a file, write and read it back through `FsMount`'s generic API.
#[test]
fn dos_round_trip_through_umbrella_mount() {
    let mut engine = DosEngine::blank(MemStore::new(
        vec![0u8; 35 * 16 * 256],
        Geometry::Sectored {
            tracks: 35,
            sectors_per_track: 16,
        },
        SectorOrdering::Dos,
    ));
    engine.format("GREETINGS", 254, false).unwrap();
    let store = engine.into_store();

    let Mount::Dos(mut fs) = mount(store, MountOptions::new()).unwrap() else {
        panic!("expected a DOS mount");
    };
    fs.prepare_file_access(true).unwrap();
    assert_eq!(fs.usage_report().unwrap().conflicts().len(), 0);

    let root = fs.root();
    let file = fs.create(root, "HELLO", CreateMode::File).unwrap();
    let id = fs.open(file, Part::DataFork, OpenMode::Rw).unwrap();
    fs.write(id, b"HI THERE").unwrap();
    fs.close(id).unwrap();

    let id = fs.open(file, Part::DataFork, OpenMode::Ro).unwrap();
    let mut buf = [0u8; 8];
    let n = fs.read(id, &mut buf).unwrap();
    fs.close(id).unwrap();
    assert_eq!(&buf[..n], b"HI THERE");
}

/// Scenario: mount a freshly formatted ProDOS volume and list its (empty)
/// root directory through the same dispatch path.
#[test]
fn prodos_mount_lists_empty_root() {
    let mut engine = ProdosEngine::blank(MemStore::new(
        vec![0u8; 280 * 512],
        Geometry::Blocked { block_count: 280 },
        SectorOrdering::Physical,
    ));
    engine.format("GREETINGS", 0, false).unwrap();
    let store = engine.into_store();

    let Mount::Prodos(mut fs) = mount(store, MountOptions::new()).unwrap() else {
        panic!("expected a ProDOS mount");
    };
    fs.prepare_file_access(false).unwrap();
    let root = fs.root();
    assert_eq!(fs.children(root).unwrap(), Vec::new());
}

/// An image with neither a valid VTOC, MDB, nor ProDOS volume header fails
/// to mount at all (`spec.md` §6 `InvalidImage`).
#[test]
fn blank_image_is_rejected() {
    let store = MemStore::new(
        vec![0u8; 280 * 512],
        Geometry::Blocked { block_count: 280 },
        SectorOrdering::Physical,
    );
    assert_eq!(mount(store, MountOptions::new()).err(), Some(Error::InvalidImage));
}

/// Scenario 6: a 140 KB DOS 3.3 image carries a Pascal volume in tracks
/// 0-15, kept off DOS's own free-sector search by a dummy `.BAD` catalog
/// entry sized to cover exactly those tracks. The top-level probe sees only
/// the DOS volume; `find_embedded_volumes` recovers the nested Pascal one,
/// and opening it lists the same files that were written into it.
#[test]
fn hybrid_dos_pascal_image_round_trips_through_embedded_discovery() {
    use paleofs::core::probe::FormatId;
    use paleofs::io::SubsetView;
    use paleofs_dos::structures::catalog::encode_name;
    use paleofs_dos::structures::{CatalogSectorInfo, CatalogSlot, DosType, TsListInfo, TsPair, VtocInfo};
    use paleofs_prodos::pascal::{PascalCatalog, PascalFileEntry, PascalVolumeHeader, PASCAL_ENTRY_LEN};

    const TRACKS: u32 = 35;
    const SPT: u32 = 16;
    const BAD_TRACKS: u64 = 16;
    const PARTITION_BLOCKS: u64 = BAD_TRACKS * SPT as u64 * 256 / 512;

    let mut engine = DosEngine::blank(MemStore::new(
        vec![0u8; TRACKS as usize * SPT as usize * 256],
        Geometry::Sectored {
            tracks: TRACKS,
            sectors_per_track: SPT,
        },
        SectorOrdering::Dos,
    ));
    engine.format("HYBRID", 254, false).unwrap();
    let mut store = engine.into_store();

    let mut vtoc_bytes = [0u8; 256];
    store.read_sector(17, 0, &mut vtoc_bytes).unwrap();
    let mut vtoc = VtocInfo::from_bytes(&vtoc_bytes, 17);
    for t in 0..BAD_TRACKS as u8 {
        vtoc.mark_track(t, false);
    }
    store.write_sector(17, 0, &vtoc.to_bytes()).unwrap();

    let mut list2 = TsListInfo::empty(244);
    list2.pairs[11] = TsPair { track: 21, sector: 0 };
    let list1 = {
        let mut l = TsListInfo::empty(122);
        l.next_track = 20;
        l.next_sector = 2;
        l
    };
    let list0 = {
        let mut l = TsListInfo::empty(0);
        l.next_track = 20;
        l.next_sector = 1;
        l
    };
    store.write_sector(20, 0, &list0.to_bytes()).unwrap();
    store.write_sector(20, 1, &list1.to_bytes()).unwrap();
    store.write_sector(20, 2, &list2.to_bytes()).unwrap();

    let mut cat_bytes = [0u8; 256];
    store.read_sector(17, 15, &mut cat_bytes).unwrap();
    let mut cat = CatalogSectorInfo::from_bytes(&cat_bytes);
    cat.slots[0] = CatalogSlot::Used {
        tsl_track: 20,
        tsl_sector: 0,
        locked: false,
        dos_type: DosType::BINARY,
        raw_name: encode_name(".BAD"),
        sector_count: 256,
    };
    store.write_sector(17, 15, &cat.to_bytes()).unwrap();

    {
        let mut view = SubsetView::contiguous(
            &mut store,
            0,
            Geometry::Blocked {
                block_count: PARTITION_BLOCKS,
            },
            SectorOrdering::ProDos,
        );
        let header = PascalVolumeHeader {
            dir_end_block: 6,
            raw_name: b"HYBRID".to_vec(),
            total_blocks: PARTITION_BLOCKS as u16,
            file_count: 1,
        };
        let file = PascalFileEntry {
            first_block: 6,
            next_block: 8,
            file_kind: 3,
            raw_name: b"HELLO.CODE".to_vec(),
            last_byte_used: 100,
        };
        let mut dir = vec![0u8; 4 * 512];
        dir[0..PASCAL_ENTRY_LEN].copy_from_slice(&header.to_bytes());
        dir[PASCAL_ENTRY_LEN..2 * PASCAL_ENTRY_LEN].copy_from_slice(&file.to_bytes());
        for (i, chunk) in dir.chunks(512).enumerate() {
            let mut block = [0u8; 512];
            block.copy_from_slice(chunk);
            view.write_block(2 + i as u64, &block).unwrap();
        }
    }

    let best = paleofs::probe(&store)
        .into_iter()
        .max_by_key(|c| c.confidence)
        .expect("the outer image is a perfectly good DOS volume");
    assert_eq!(best.format, FormatId::Dos);

    let found = find_embedded_volumes(&mut store).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].format, FormatId::Pascal);
    assert_eq!(found[0].start_block, 0);
    assert_eq!(found[0].block_count, PARTITION_BLOCKS);

    let view = SubsetView::contiguous(
        &mut store,
        found[0].start_block,
        Geometry::Blocked {
            block_count: found[0].block_count,
        },
        found[0].ordering,
    );
    let catalog = PascalCatalog::open(&view).unwrap();
    assert_eq!(catalog.header.raw_name, b"HYBRID");
    assert_eq!(catalog.files.len(), 1);
    assert_eq!(catalog.files[0].name(), "HELLO.CODE");
}
