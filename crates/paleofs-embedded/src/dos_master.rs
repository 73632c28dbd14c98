//! DOS-MASTER style embedding (`spec.md` §4.10, second bullet): one or more
//! whole DOS 3.x volumes packed into a run of blocks a ProDOS volume's free
//! bitmap marks used, but that no ProDOS file or system structure claims.
//!
//! `ProdosEngine::scan_usage` only ever records ownership for blocks it
//! actually visits walking its own directory tree, so it never sees a
//! foreign volume's blocks. Cross-referencing that against the volume's own
//! bitmap (loaded independently via [`paleofs_prodos::bitmap`]) is the only
//! way to find space the bitmap calls used but nothing ProDOS-side claims.

use paleofs_core::error::Result;
use paleofs_core::probe::{Confidence, Probe};
use paleofs_io::{ChunkStore, Geometry, SectorOrdering, SubsetView};
use paleofs_prodos::bitmap;
use paleofs_prodos::structures::{VolumeHeader, ENTRY_LEN};
use paleofs_prodos::{ProdosEngine, ProdosProbe};

use paleofs_core::engine::Engine;
use paleofs_core::probe::FormatId;
use paleofs_dos::DosProbe;

use crate::EmbeddedPartition;

const ROOT_BLOCK: u64 = 2;

/// `(size in 512-byte blocks, tracks, sectors per track)` for the candidate
/// DOS volume sizes `spec.md` §4.10 names, in the order it lists them. A run
/// is subdivided uniformly by exactly one of these sizes — never a mix —
/// so candidates aren't ordered by preference the way a greedy packer's
/// would be.
const DOS_VOLUME_GEOMETRIES: &[(u64, u32, u32)] = &[
    (280, 35, 16),
    (320, 40, 16),
    (400, 50, 16),
    (800, 50, 32),
];

/// `1600 - 7` and `1600 - 63`: an 800KB-per-volume DOS-MASTER pair (two
/// 800-block volumes back to back) whose front 7 or 63 blocks are claimed by
/// ProDOS itself, so the free-bitmap/unowned scan only ever sees a run this
/// much shorter than the full 1600 blocks the pair actually occupies
/// (`spec.md` §4.10: "Special 800KB 1600-block layouts leave either 7 or 63
/// ProDOS-visible blocks at the front").
const DOUBLE_800K_VISIBLE_HEAD: [u64; 2] = [7, 63];

pub fn find_dos_master<S: ChunkStore>(store: &mut S) -> Result<Vec<EmbeddedPartition>> {
    let total_blocks = match store.geometry() {
        Geometry::Blocked { block_count } => block_count,
        Geometry::Sectored { .. } => return Ok(Vec::new()),
    };
    if <ProdosProbe as Probe>::test(&*store) < Confidence::Maybe {
        return Ok(Vec::new());
    }

    let mut header_block = [0u8; 512];
    store.read_block(ROOT_BLOCK, &mut header_block)?;
    let raw: [u8; ENTRY_LEN] = header_block[4..4 + ENTRY_LEN]
        .try_into()
        .expect("block is 512 bytes, well past 4 + ENTRY_LEN");
    let Some(header) = VolumeHeader::from_bytes(&raw) else {
        return Ok(Vec::new());
    };

    let alloc_map = bitmap::load(&*store, header.bit_map_pointer, header.total_blocks)?;

    let usage = {
        let view = SubsetView::contiguous(
            &mut *store,
            0,
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        );
        let mut engine = ProdosEngine::mount(view)?;
        engine.scan_usage()?
    };

    let is_unowned_used = |b: u64| !alloc_map.is_free(b).unwrap_or(false) && usage.get(b).is_none();

    // Walk backward from the end of the filesystem, as `spec.md` §4.10
    // directs, collecting maximal unowned-but-used runs nearest the end
    // first.
    let mut found = Vec::new();
    let mut block = total_blocks;
    while block > 0 {
        block -= 1;
        if !is_unowned_used(block) {
            continue;
        }
        let run_end = block + 1;
        while block > 0 && is_unowned_used(block - 1) {
            block -= 1;
        }
        let run_start = block;
        if let Some(partitions) = candidates_in_run(store, run_start, run_end - run_start)? {
            found.extend(partitions);
        }
    }
    Ok(found)
}

/// Tries to subdivide `[run_start, run_start + run_len)` into equal-sized DOS
/// volumes of exactly one candidate size, accepting a size only if *every*
/// slot probes DOS at `Maybe` or better (`spec.md` §4.10). Returns `None` if
/// no candidate size cleanly subdivides the run.
fn candidates_in_run<S: ChunkStore>(
    store: &mut S,
    run_start: u64,
    run_len: u64,
) -> Result<Option<Vec<EmbeddedPartition>>> {
    for &(size, tracks, sectors_per_track) in DOS_VOLUME_GEOMETRIES {
        if run_len % size == 0 && run_len > 0 {
            if let Some(found) =
                probe_uniform_slots(store, run_start, run_len / size, size, tracks, sectors_per_track)?
            {
                return Ok(Some(found));
            }
        }
    }

    // The double-800KB layout: the visible run is 7 or 63 blocks short of
    // the full 1600-block pair because ProDOS claims those leading blocks
    // itself. Re-anchor the scan to where the pair would actually start and
    // probe it as two ordinary 800-block volumes.
    for head in DOUBLE_800K_VISIBLE_HEAD {
        if run_len + head == 1600 && run_start >= head {
            if let Some(found) =
                probe_uniform_slots(store, run_start - head, 2, 800, 50, 32)?
            {
                return Ok(Some(found));
            }
        }
    }

    Ok(None)
}

fn probe_uniform_slots<S: ChunkStore>(
    store: &mut S,
    start: u64,
    slots: u64,
    size: u64,
    tracks: u32,
    sectors_per_track: u32,
) -> Result<Option<Vec<EmbeddedPartition>>> {
    let mut out = Vec::with_capacity(slots as usize);
    for slot in 0..slots {
        let view = SubsetView::contiguous(
            &mut *store,
            start + slot * size,
            Geometry::Sectored { tracks, sectors_per_track },
            SectorOrdering::Dos,
        );
        if <DosProbe as Probe>::test(&view) < Confidence::Maybe {
            return Ok(None);
        }
        out.push(EmbeddedPartition {
            format: FormatId::Dos,
            start_block: start + slot * size,
            block_count: size,
            ordering: SectorOrdering::Dos,
        });
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_dos::DosEngine;
    use paleofs_io::MemStore;

    /// A 400-block ProDOS volume whose bitmap marks blocks 100..380 used
    /// (simulating DOS-MASTER's reservation) with no file claiming them, and
    /// a real formatted 35-track (280-block) DOS volume written into the
    /// first part of that range.
    fn dos_master_image() -> MemStore {
        let total_blocks = 400u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("MASTER", 0, false).unwrap();
        let mut store = engine.into_store();

        {
            let mut header_block = [0u8; 512];
            store.read_block(ROOT_BLOCK, &mut header_block).unwrap();
            let raw: [u8; ENTRY_LEN] = header_block[4..4 + ENTRY_LEN].try_into().unwrap();
            let header = VolumeHeader::from_bytes(&raw).unwrap();

            let mut map = bitmap::load(&store, header.bit_map_pointer, header.total_blocks).unwrap();
            for b in 100..380 {
                map.force_state(b, false, None).unwrap();
            }
            bitmap::store_bitmap(&mut store, header.bit_map_pointer, header.total_blocks, &map).unwrap();
        }

        {
            let dos_view = SubsetView::contiguous(
                &mut store,
                100,
                Geometry::Sectored {
                    tracks: 35,
                    sectors_per_track: 16,
                },
                SectorOrdering::Dos,
            );
            let mut dos = DosEngine::blank(dos_view);
            dos.format("EMBEDDED", 1, false).unwrap();
        }

        store
    }

    #[test]
    fn finds_dos_volume_packed_into_unowned_bitmap_run() {
        let mut store = dos_master_image();
        let found = find_dos_master(&mut store).unwrap();
        assert_eq!(
            found,
            vec![EmbeddedPartition {
                format: FormatId::Dos,
                start_block: 100,
                block_count: 280,
                ordering: SectorOrdering::Dos,
            }]
        );
    }

    /// A double-800K DOS-MASTER pack: two back-to-back 800-block DOS volumes
    /// starting at block 300, with the bitmap only showing blocks 307..1900
    /// as unowned-used — the leading 7 blocks of the pair (300..307) are
    /// left looking ProDOS-visible, matching the front-of-layout quirk
    /// `spec.md` §4.10 calls out for 1600-block double-800KB packs.
    fn double_800k_image() -> MemStore {
        let total_blocks = 2000u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("MASTER", 0, false).unwrap();
        let mut store = engine.into_store();

        {
            let mut header_block = [0u8; 512];
            store.read_block(ROOT_BLOCK, &mut header_block).unwrap();
            let raw: [u8; ENTRY_LEN] = header_block[4..4 + ENTRY_LEN].try_into().unwrap();
            let header = VolumeHeader::from_bytes(&raw).unwrap();

            let mut map = bitmap::load(&store, header.bit_map_pointer, header.total_blocks).unwrap();
            for b in 307..1900 {
                map.force_state(b, false, None).unwrap();
            }
            bitmap::store_bitmap(&mut store, header.bit_map_pointer, header.total_blocks, &map).unwrap();
        }

        for start in [300u64, 1100u64] {
            let dos_view = SubsetView::contiguous(
                &mut store,
                start,
                Geometry::Sectored { tracks: 50, sectors_per_track: 32 },
                SectorOrdering::Dos,
            );
            let mut dos = DosEngine::blank(dos_view);
            dos.format("EMBEDDED", 1, false).unwrap();
        }

        store
    }

    #[test]
    fn finds_both_volumes_of_a_double_800k_pack_with_7_visible_blocks() {
        let mut store = double_800k_image();
        let found = find_dos_master(&mut store).unwrap();
        assert_eq!(
            found,
            vec![
                EmbeddedPartition {
                    format: FormatId::Dos,
                    start_block: 300,
                    block_count: 800,
                    ordering: SectorOrdering::Dos,
                },
                EmbeddedPartition {
                    format: FormatId::Dos,
                    start_block: 1100,
                    block_count: 800,
                    ordering: SectorOrdering::Dos,
                },
            ]
        );
    }

    #[test]
    fn finds_nothing_on_a_plain_prodos_volume() {
        let total_blocks = 280u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("WHOLE", 0, false).unwrap();
        let mut store = engine.into_store();
        assert_eq!(find_dos_master(&mut store).unwrap(), Vec::new());
    }
}
