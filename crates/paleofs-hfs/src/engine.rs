//! The `paleofs_core::Engine` implementation for true HFS volumes
//! (`spec.md` §4.8): MDB, volume bitmap, and the catalog/extents-overflow
//! B*-trees. MFS volumes are recognized by [`crate::probe::HfsProbe`] but
//! mounting one here returns [`Error::NotSupported`] — MFS's flat directory
//! file is a different enough on-disk shape that it is out of scope for this
//! pass (`DESIGN.md`).

use std::cmp::Ordering;

use chrono::{TimeZone, Utc};
use paleofs_common::{AllocMap, FileId, Owner, VolumeUsage};
use paleofs_core::engine::{CreateMode, Engine};
use paleofs_core::entry::{Access, DirEntry, EntryStatus, Sizes, Timestamps, TypeInfo};
use paleofs_core::error::{Error, Result};
use paleofs_core::notes::Notes;
use paleofs_core::tracker::{OpenMode, Part};
use paleofs_io::{AccessLevel, ChunkStore, Geometry};

use crate::bitmap;
use crate::btree::BTree;
use crate::storage::{BlockAllocator, ForkStorage, OverflowExtents};
use crate::structures::{
    CatalogKey, CatalogRecord, DirRecord, ExtDataRec, ExtDescriptor, ExtentKey, FileFlags,
    FileRecord, Fork, MdbInfo, ThreadRecord, VolumeAttrs, HFS_SIGNATURE, MDB_LEN,
};

/// `spec.md` §4.8: real HFS reserves CNID 1 for "the parent of the root"
/// and CNID 2 for the root directory itself; user CNIDs start at 16.
const ROOT_PARENT_ID: u32 = 1;
const ROOT_DIR_ID: u32 = 2;
const FIRST_USER_CNID: u32 = 16;
const EXTENTS_FILE_CNID: u32 = 3;
const CATALOG_FILE_CNID: u32 = 4;
const MAX_CATALOG_NAME_LEN: usize = 31;
const MIN_VOLUME_BLOCKS: u64 = 800;

type KeyCmp = fn(&[u8], &[u8]) -> Ordering;

fn catalog_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let (Some(ka), Some(kb)) = (CatalogKey::from_bytes(a), CatalogKey::from_bytes(b)) else {
        return a.cmp(b);
    };
    ka.compare(&kb)
}

fn extent_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn encode_ext(e: ExtDescriptor) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&e.start_abn.to_be_bytes());
    out.extend_from_slice(&e.num_abn.to_be_bytes());
    out
}

fn decode_ext(bytes: &[u8]) -> Option<ExtDescriptor> {
    Some(ExtDescriptor {
        start_abn: u16::from_be_bytes(bytes.get(0..2)?.try_into().ok()?),
        num_abn: u16::from_be_bytes(bytes.get(2..4)?.try_into().ok()?),
    })
}

fn file_id(cnid: u32) -> FileId {
    FileId::new(cnid as u64)
}

/// Places the 162-byte MDB at the front of a zero-padded logical block.
fn mdb_block(mdb: &MdbInfo) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..MDB_LEN].copy_from_slice(&mdb.to_bytes());
    block
}

/// Wraps [`AllocMap`] so it can serve as a [`BlockAllocator`] for B*-tree
/// node growth and fork extension alike.
struct MapAllocator<'a>(&'a mut AllocMap);

impl BlockAllocator for MapAllocator<'_> {
    fn alloc_block(&mut self) -> Result<u32> {
        Ok(self.0.alloc(Owner::System)? as u32)
    }
}

/// Resolves extents-overflow fragments through the real extents-overflow
/// B*-tree (`spec.md` §4.8), keyed `(file_cnid, fork, first_ablk)` with
/// `first_ablk` the running allocation-block offset across that file's own
/// overflow fragments (not counting the three direct extents, a
/// simplification noted in `DESIGN.md`).
struct TreeOverflow<'a> {
    tree: &'a mut BTree<KeyCmp>,
}

impl OverflowExtents for TreeOverflow<'_> {
    fn extra_extents(&self, store: &dyn ChunkStore, cnid: u32, fork: Fork) -> Vec<ExtDescriptor> {
        let start = ExtentKey {
            file_cnid: cnid,
            fork,
            first_ablk: 0,
        }
        .to_bytes();
        let entries = self
            .tree
            .scan(store, &start, |k, _| {
                ExtentKey::from_bytes(k).map(|ek| ek.file_cnid == cnid && ek.fork == fork).unwrap_or(false)
            })
            .unwrap_or_default();
        entries.into_iter().filter_map(|(_, data)| decode_ext(&data)).collect()
    }

    fn append_extent(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        cnid: u32,
        fork: Fork,
        ext: ExtDescriptor,
    ) -> Result<()> {
        let existing = self.extra_extents(store, cnid, fork);
        let first_ablk: u16 = existing.iter().map(|e| e.num_abn).sum();
        let key = ExtentKey { file_cnid: cnid, fork, first_ablk };
        self.tree.insert(store, allocator, key.to_bytes().to_vec(), encode_ext(ext))
    }

    fn remove_last_extent(
        &mut self,
        store: &mut dyn ChunkStore,
        cnid: u32,
        fork: Fork,
    ) -> Result<Option<ExtDescriptor>> {
        let existing = self.extra_extents(store, cnid, fork);
        let Some(&last) = existing.last() else {
            return Ok(None);
        };
        let first_ablk: u16 = existing[..existing.len() - 1].iter().map(|e| e.num_abn).sum();
        let key = ExtentKey { file_cnid: cnid, fork, first_ablk };
        self.tree.delete(store, &key.to_bytes())?;
        Ok(Some(last))
    }
}

/// Lossy Mac-Roman-to-`String` decode. Full Mac-Roman glyph tables are the
/// excluded "character-set conversion tables" collaborator (`spec.md` §1);
/// `raw_name` on [`DirEntry`] carries the authoritative bytes, the same way
/// `paleofs-dos` treats `decode_name` as display-only.
fn decode_catalog_name(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub struct HfsEngine<S: ChunkStore> {
    store: S,
    mdb: MdbInfo,
    bitmap: AllocMap,
    catalog: Option<BTree<KeyCmp>>,
    extents: Option<BTree<KeyCmp>>,
    access_level: AccessLevel,
    notes: Notes,
}

impl<S: ChunkStore> HfsEngine<S> {
    /// Mounts an existing true-HFS volume (`drSigWord == HFS_SIGNATURE`).
    pub fn mount(store: S) -> Result<Self> {
        if !is_allowed_geometry(&store.geometry()) {
            return Err(Error::InvalidImage);
        }
        let mut block = [0u8; 512];
        store.read_block(2, &mut block)?;
        let mdb_bytes: [u8; MDB_LEN] = block[..MDB_LEN].try_into().expect("512 >= MDB_LEN");
        let mdb = MdbInfo::from_bytes(&mdb_bytes);
        if !mdb.is_hfs() {
            return Err(Error::InvalidImage);
        }

        let bitmap = bitmap::load(&store, mdb.bitmap_start as u64, mdb.alloc_block_count)?;
        let catalog_fork = ForkStorage::new(CATALOG_FILE_CNID, Fork::Data, mdb.catalog_first_extents, &mdb);
        let catalog = BTree::open(&store, catalog_fork, catalog_cmp as KeyCmp)?;
        let extents_fork = ForkStorage::new(EXTENTS_FILE_CNID, Fork::Data, mdb.extents_first_extents, &mdb);
        let extents = BTree::open(&store, extents_fork, extent_cmp as KeyCmp)?;

        Ok(Self {
            store,
            mdb,
            bitmap,
            catalog: Some(catalog),
            extents: Some(extents),
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        })
    }

    /// Wraps a store with no on-disk HFS structures yet; call
    /// [`Engine::format`] before doing anything else with it.
    pub fn blank(store: S) -> Self {
        Self {
            store,
            mdb: MdbInfo {
                signature: HFS_SIGNATURE,
                created: Utc.timestamp_opt(0, 0).single().unwrap(),
                modified: Utc.timestamp_opt(0, 0).single().unwrap(),
                attributes: VolumeAttrs::empty(),
                root_file_count: 0,
                bitmap_start: 0,
                alloc_search_ptr: 0,
                alloc_block_count: 0,
                alloc_block_size: 512,
                default_clump_size: 0,
                alloc_block_start: 0,
                next_cnid: FIRST_USER_CNID,
                free_blocks: 0,
                volume_name: Vec::new(),
                backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
                backup_seq_num: 0,
                write_count: 0,
                extents_clump_size: 0,
                catalog_clump_size: 0,
                root_dir_count: 0,
                file_count: 0,
                dir_count: 0,
                finder_info: [0; 32],
                extents_file_size: 0,
                extents_first_extents: ExtDataRec::EMPTY,
                catalog_file_size: 0,
                catalog_first_extents: ExtDataRec::EMPTY,
            },
            bitmap: AllocMap::new(0, 0),
            catalog: None,
            extents: None,
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn catalog_ref(&self) -> Result<&BTree<KeyCmp>> {
        self.catalog.as_ref().ok_or(Error::InvalidImage)
    }

    /// Looks up the entry named by `cnid` via its catalog thread record
    /// (`spec.md` §4.8), returning the entry's own catalog key and record.
    fn resolve(&self, cnid: u32) -> Result<(CatalogKey, CatalogRecord)> {
        let catalog = self.catalog_ref()?;
        let thread_key = CatalogKey { parent_cnid: cnid, name: Vec::new() };
        let thread_bytes = catalog.find(&self.store, &thread_key.to_bytes())?.ok_or(Error::NotFound)?;
        let CatalogRecord::Thread(thread) = CatalogRecord::from_bytes(&thread_bytes).ok_or(Error::Damaged)?
        else {
            return Err(Error::Damaged);
        };
        let key = CatalogKey { parent_cnid: thread.parent_cnid, name: thread.name };
        let rec_bytes = catalog.find(&self.store, &key.to_bytes())?.ok_or(Error::NotFound)?;
        let rec = CatalogRecord::from_bytes(&rec_bytes).ok_or(Error::Damaged)?;
        Ok((key, rec))
    }

    fn fork_storage(&self, file: &FileRecord, part: Part) -> Result<(ForkStorage, Fork)> {
        let (fork, extents) = match part {
            Part::DataFork | Part::RawData => (Fork::Data, file.data_extents),
            Part::RsrcFork => (Fork::Rsrc, file.rsrc_extents),
        };
        Ok((ForkStorage::new(file.cnid, fork, extents, &self.mdb), fork))
    }

    fn bump_valence(&mut self, parent_cnid: u32, delta: i32) -> Result<()> {
        let (key, rec) = self.resolve(parent_cnid)?;
        let CatalogRecord::Dir(mut dir) = rec else {
            return Ok(());
        };
        dir.valence = (dir.valence as i64 + delta as i64).max(0) as u32;
        let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
        let mut allocator = MapAllocator(&mut self.bitmap);
        catalog.insert(&mut self.store, &mut allocator, key.to_bytes(), CatalogRecord::Dir(dir).to_bytes())
    }

    fn free_fork(&mut self, cnid: u32, fork: Fork, extents: ExtDataRec) -> Result<ExtDataRec> {
        let mut storage = ForkStorage::new(cnid, fork, extents, &self.mdb);
        loop {
            let released = {
                let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
                let mut overflow = TreeOverflow { tree: extents_tree };
                storage.trim_one(&mut self.store, &mut overflow)?
            };
            match released {
                Some(abn) => self.bitmap.free(abn as u64)?,
                None => break,
            }
        }
        Ok(storage.first_extents)
    }
}

fn is_allowed_geometry(geometry: &Geometry) -> bool {
    matches!(geometry, Geometry::Blocked { block_count } if *block_count >= MIN_VOLUME_BLOCKS)
}

impl<S: ChunkStore> Engine for HfsEngine<S> {
    type EntryRef = u32;

    fn root(&self) -> Self::EntryRef {
        ROOT_DIR_ID
    }

    fn entry(&self, r: Self::EntryRef) -> Result<DirEntry> {
        let (key, rec) = self.resolve(r)?;
        let type_info = if r == ROOT_DIR_ID {
            TypeInfo::VolumeDirectory
        } else {
            match &rec {
                CatalogRecord::Dir(_) => TypeInfo::Directory,
                CatalogRecord::File(f) => TypeInfo::Hfs { file_type: f.file_type(), creator: f.creator() },
                CatalogRecord::Thread(_) => return Err(Error::Damaged),
            }
        };
        let (mut access, sizes, timestamps) = match &rec {
            CatalogRecord::Dir(d) => (
                Access::empty(),
                Sizes::default(),
                Timestamps { created: Some(d.created), modified: Some(d.modified) },
            ),
            CatalogRecord::File(f) => (
                Access::empty(),
                Sizes {
                    data_len: f.data_logical_len as u64,
                    rsrc_len: f.rsrc_logical_len as u64,
                    storage_len: f.data_physical_len as u64 + f.rsrc_physical_len as u64,
                },
                Timestamps { created: Some(f.created), modified: Some(f.modified) },
            ),
            CatalogRecord::Thread(_) => return Err(Error::Damaged),
        };
        if let CatalogRecord::File(f) = &rec {
            if f.flags.locked {
                access |= Access::LOCKED;
            }
        }
        Ok(DirEntry {
            name: decode_catalog_name(&key.name),
            raw_name: key.name,
            access,
            type_info,
            sizes,
            timestamps,
            status: EntryStatus::default(),
        })
    }

    fn children(&self, parent: Self::EntryRef) -> Result<Vec<Self::EntryRef>> {
        let catalog = self.catalog_ref()?;
        let start = CatalogKey { parent_cnid: parent, name: Vec::new() }.to_bytes();
        let entries = catalog.scan(&self.store, &start, |k, _| {
            CatalogKey::from_bytes(k).map(|ck| ck.parent_cnid == parent).unwrap_or(false)
        })?;
        let mut out = Vec::new();
        for (_, data) in entries {
            match CatalogRecord::from_bytes(&data) {
                Some(CatalogRecord::Dir(d)) => out.push(d.cnid),
                Some(CatalogRecord::File(f)) => out.push(f.cnid),
                _ => {}
            }
        }
        Ok(out)
    }

    fn supports_part(&self, part: Part) -> bool {
        matches!(part, Part::DataFork | Part::RsrcFork | Part::RawData)
    }

    fn scan_usage(&mut self) -> Result<VolumeUsage> {
        let alloc_size = self.mdb.alloc_block_size as u64;
        let blocks_per_alloc = alloc_size / 512;
        let total_blocks = match self.store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Err(Error::InvalidImage),
        };

        let mut usage = VolumeUsage::new();
        usage.set_owner(0, Owner::System);
        usage.set_owner(1, Owner::System);
        usage.set_owner(2, Owner::System);
        usage.set_owner(total_blocks.saturating_sub(2), Owner::System);
        let bitmap_blocks = bitmap::bitmap_blocks(self.mdb.alloc_block_count) as u64;
        for b in 0..bitmap_blocks {
            usage.set_owner(self.mdb.bitmap_start as u64 + b, Owner::System);
        }

        let mdb = self.mdb.clone();
        let mark_extent = |usage: &mut VolumeUsage, ext: ExtDescriptor, owner: Owner| {
            for abn in ext.start_abn as u32..ext.start_abn as u32 + ext.num_abn as u32 {
                let base = mdb.logical_block_of(abn);
                for blk in 0..blocks_per_alloc {
                    usage.set_owner(base + blk, owner);
                }
            }
        };

        for ext in mdb.catalog_first_extents.0.iter().filter(|e| !e.is_empty()) {
            mark_extent(&mut usage, *ext, Owner::System);
        }
        for ext in mdb.extents_first_extents.0.iter().filter(|e| !e.is_empty()) {
            mark_extent(&mut usage, *ext, Owner::System);
        }

        let all: Vec<(Vec<u8>, Vec<u8>)> = {
            let catalog = self.catalog_ref()?;
            catalog.scan(&self.store, &[0u8; 5], |_, _| true)?
        };
        for (_, data) in &all {
            if let Some(CatalogRecord::File(f)) = CatalogRecord::from_bytes(data) {
                let owner = Owner::File(file_id(f.cnid));
                for ext in f.data_extents.0.iter().filter(|e| !e.is_empty()) {
                    mark_extent(&mut usage, *ext, owner);
                }
                for ext in f.rsrc_extents.0.iter().filter(|e| !e.is_empty()) {
                    mark_extent(&mut usage, *ext, owner);
                }
                let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
                let overflow = TreeOverflow { tree: extents_tree };
                for ext in overflow.extra_extents(&self.store, f.cnid, Fork::Data) {
                    mark_extent(&mut usage, ext, owner);
                }
                for ext in overflow.extra_extents(&self.store, f.cnid, Fork::Rsrc) {
                    mark_extent(&mut usage, ext, owner);
                }
            }
        }
        Ok(usage)
    }

    fn read_at(&mut self, r: Self::EntryRef, part: Part, mode: OpenMode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let _ = mode;
        let (_, rec) = self.resolve(r)?;
        let CatalogRecord::File(file) = rec else { return Err(Error::InvalidMode) };
        let (fork_storage, _) = self.fork_storage(&file, part)?;
        let logical_len = match part {
            Part::RsrcFork => file.rsrc_logical_len,
            _ => file.data_logical_len,
        } as u64;
        let available = logical_len.saturating_sub(offset);
        let want = (buf.len() as u64).min(available) as usize;
        if want > 0 {
            let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
            let overflow = TreeOverflow { tree: extents_tree };
            fork_storage.read_at(&self.store, offset, &mut buf[..want], &overflow)?;
        }
        Ok(want)
    }

    fn write_at(&mut self, r: Self::EntryRef, part: Part, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (key, rec) = self.resolve(r)?;
        let CatalogRecord::File(mut file) = rec else { return Err(Error::InvalidMode) };
        let (mut storage, fork) = self.fork_storage(&file, part)?;
        let alloc_size = self.mdb.alloc_block_size as u64;
        let needed_end = offset + buf.len() as u64;

        loop {
            let have = {
                let extents_tree = self.extents.as_ref().ok_or(Error::InvalidImage)?;
                storage.total_blocks(&self.store, &ReadOnlyOverflow(extents_tree)) as u64 * alloc_size
            };
            if have >= needed_end {
                break;
            }
            let abn = self.bitmap.alloc(Owner::File(file_id(file.cnid)))? as u32;
            let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
            let mut overflow = TreeOverflow { tree: extents_tree };
            let mut allocator = MapAllocator(&mut self.bitmap);
            storage.extend(&mut self.store, &mut allocator, abn, &mut overflow)?;
        }

        {
            let extents_tree = self.extents.as_ref().ok_or(Error::InvalidImage)?;
            storage.write_at(&mut self.store, offset, buf, &ReadOnlyOverflow(extents_tree))?;
        }

        let new_logical = needed_end;
        let physical = {
            let extents_tree = self.extents.as_ref().ok_or(Error::InvalidImage)?;
            storage.total_blocks(&self.store, &ReadOnlyOverflow(extents_tree)) as u64 * alloc_size
        };
        match fork {
            Fork::Data => {
                file.data_extents = storage.first_extents;
                file.data_logical_len = file.data_logical_len.max(new_logical as u32);
                file.data_physical_len = physical as u32;
            }
            Fork::Rsrc => {
                file.rsrc_extents = storage.first_extents;
                file.rsrc_logical_len = file.rsrc_logical_len.max(new_logical as u32);
                file.rsrc_physical_len = physical as u32;
            }
        }
        let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
        let mut allocator = MapAllocator(&mut self.bitmap);
        catalog.insert(&mut self.store, &mut allocator, key.to_bytes(), CatalogRecord::File(file).to_bytes())?;
        Ok(buf.len())
    }

    fn len_of(&self, r: Self::EntryRef, part: Part, mode: OpenMode) -> Result<u64> {
        let _ = mode;
        let (_, rec) = self.resolve(r)?;
        let CatalogRecord::File(file) = rec else { return Err(Error::InvalidMode) };
        Ok(match part {
            Part::RsrcFork => file.rsrc_logical_len,
            _ => file.data_logical_len,
        } as u64)
    }

    fn set_len(&mut self, r: Self::EntryRef, part: Part, new_len: u64) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (key, rec) = self.resolve(r)?;
        let CatalogRecord::File(mut file) = rec else { return Err(Error::InvalidMode) };
        let (fork, extents) = match part {
            Part::RsrcFork => (Fork::Rsrc, file.rsrc_extents),
            _ => (Fork::Data, file.data_extents),
        };
        let alloc_size = self.mdb.alloc_block_size as u64;
        let wanted_blocks = new_len.div_ceil(alloc_size);
        let mut storage = ForkStorage::new(file.cnid, fork, extents, &self.mdb);

        loop {
            let have = {
                let extents_tree = self.extents.as_ref().ok_or(Error::InvalidImage)?;
                storage.total_blocks(&self.store, &ReadOnlyOverflow(extents_tree)) as u64
            };
            if have <= wanted_blocks {
                break;
            }
            let released = {
                let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
                let mut overflow = TreeOverflow { tree: extents_tree };
                storage.trim_one(&mut self.store, &mut overflow)?
            };
            match released {
                Some(abn) => self.bitmap.free(abn as u64)?,
                None => break,
            }
        }
        while {
            let extents_tree = self.extents.as_ref().ok_or(Error::InvalidImage)?;
            (storage.total_blocks(&self.store, &ReadOnlyOverflow(extents_tree)) as u64) < wanted_blocks
        } {
            let abn = self.bitmap.alloc(Owner::File(file_id(file.cnid)))? as u32;
            let extents_tree = self.extents.as_mut().ok_or(Error::InvalidImage)?;
            let mut overflow = TreeOverflow { tree: extents_tree };
            let mut allocator = MapAllocator(&mut self.bitmap);
            storage.extend(&mut self.store, &mut allocator, abn, &mut overflow)?;
        }

        let physical = wanted_blocks * alloc_size;
        match fork {
            Fork::Data => {
                file.data_extents = storage.first_extents;
                file.data_logical_len = new_len as u32;
                file.data_physical_len = physical as u32;
            }
            Fork::Rsrc => {
                file.rsrc_extents = storage.first_extents;
                file.rsrc_logical_len = new_len as u32;
                file.rsrc_physical_len = physical as u32;
            }
        }
        let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
        let mut allocator = MapAllocator(&mut self.bitmap);
        catalog.insert(&mut self.store, &mut allocator, key.to_bytes(), CatalogRecord::File(file).to_bytes())
    }

    fn next_data_or_hole(&self, _r: Self::EntryRef, _part: Part, _from: u64, _want_hole: bool) -> Result<Option<u64>> {
        // HFS forks carry no sparse-hole bookkeeping beyond their extent
        // list; every allocated block is live data (`spec.md` §4.8).
        Ok(None)
    }

    fn flush_descriptor(&mut self, _r: Self::EntryRef, _part: Part) -> Result<()> {
        Ok(())
    }

    fn create(&mut self, parent: Self::EntryRef, name: &str, create_mode: CreateMode) -> Result<Self::EntryRef> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if name.is_empty() || name.len() > MAX_CATALOG_NAME_LEN {
            return Err(Error::InvalidName);
        }
        let name_bytes = name.as_bytes().to_vec();
        let key = CatalogKey { parent_cnid: parent, name: name_bytes.clone() };
        {
            let catalog = self.catalog_ref()?;
            if catalog.find(&self.store, &key.to_bytes())?.is_some() {
                return Err(Error::Exists);
            }
        }

        let cnid = self.mdb.next_cnid;
        self.mdb.next_cnid += 1;
        let now = Utc::now();

        let record = match create_mode {
            CreateMode::Directory => CatalogRecord::Dir(DirRecord {
                cnid,
                locked: false,
                valence: 0,
                created: now,
                modified: now,
                backup: Utc.timestamp_opt(0, 0).single().unwrap(),
                finder_info: [0; 32],
            }),
            CreateMode::File => CatalogRecord::File(FileRecord {
                cnid,
                flags: FileFlags { locked: false, used: true },
                finder_info: [0; 16],
                fxinfo: [0; 16],
                data_logical_len: 0,
                data_physical_len: 0,
                rsrc_logical_len: 0,
                rsrc_physical_len: 0,
                created: now,
                modified: now,
                backup: Utc.timestamp_opt(0, 0).single().unwrap(),
                data_extents: ExtDataRec::EMPTY,
                rsrc_extents: ExtDataRec::EMPTY,
            }),
        };
        let thread = ThreadRecord {
            parent_cnid: parent,
            name: name_bytes,
            is_dir: create_mode == CreateMode::Directory,
        };

        {
            let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
            let mut allocator = MapAllocator(&mut self.bitmap);
            catalog.insert(&mut self.store, &mut allocator, key.to_bytes(), record.to_bytes())?;
        }
        {
            let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
            let mut allocator = MapAllocator(&mut self.bitmap);
            let thread_key = CatalogKey { parent_cnid: cnid, name: Vec::new() };
            catalog.insert(&mut self.store, &mut allocator, thread_key.to_bytes(), CatalogRecord::Thread(thread).to_bytes())?;
        }

        self.bump_valence(parent, 1)?;
        match create_mode {
            CreateMode::Directory => {
                self.mdb.dir_count += 1;
                if parent == ROOT_DIR_ID {
                    self.mdb.root_dir_count += 1;
                }
            }
            CreateMode::File => {
                self.mdb.file_count += 1;
                if parent == ROOT_DIR_ID {
                    self.mdb.root_file_count += 1;
                }
            }
        }
        Ok(cnid)
    }

    fn delete(&mut self, r: Self::EntryRef) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if r == ROOT_DIR_ID {
            return Err(Error::InvalidMode);
        }
        let (key, rec) = self.resolve(r)?;
        match &rec {
            CatalogRecord::Dir(d) if d.valence > 0 => return Err(Error::NotSupported),
            CatalogRecord::Thread(_) => return Err(Error::Damaged),
            _ => {}
        }
        if let CatalogRecord::File(f) = &rec {
            self.free_fork(f.cnid, Fork::Data, f.data_extents)?;
            self.free_fork(f.cnid, Fork::Rsrc, f.rsrc_extents)?;
        }

        let is_dir = matches!(rec, CatalogRecord::Dir(_));
        let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
        catalog.delete(&mut self.store, &key.to_bytes())?;
        let thread_key = CatalogKey { parent_cnid: r, name: Vec::new() };
        catalog.delete(&mut self.store, &thread_key.to_bytes())?;

        self.bump_valence(key.parent_cnid, -1)?;
        if is_dir {
            self.mdb.dir_count = self.mdb.dir_count.saturating_sub(1);
        } else {
            self.mdb.file_count = self.mdb.file_count.saturating_sub(1);
        }
        Ok(())
    }

    fn move_entry(&mut self, r: Self::EntryRef, new_parent: Self::EntryRef, new_name: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if r == ROOT_DIR_ID {
            return Err(Error::NotSupported);
        }
        if new_name.is_empty() || new_name.len() > MAX_CATALOG_NAME_LEN {
            return Err(Error::InvalidName);
        }
        let (old_key, rec) = self.resolve(r)?;
        let new_name_bytes = new_name.as_bytes().to_vec();
        let new_key = CatalogKey { parent_cnid: new_parent, name: new_name_bytes.clone() };
        if old_key.parent_cnid != new_parent || old_key.name != new_name_bytes {
            let catalog = self.catalog_ref()?;
            if catalog.find(&self.store, &new_key.to_bytes())?.is_some() {
                return Err(Error::Exists);
            }
        }
        let is_dir = matches!(rec, CatalogRecord::Dir(_));

        let catalog = self.catalog.as_mut().ok_or(Error::InvalidImage)?;
        let mut allocator = MapAllocator(&mut self.bitmap);
        catalog.delete(&mut self.store, &old_key.to_bytes())?;
        catalog.insert(&mut self.store, &mut allocator, new_key.to_bytes(), rec.to_bytes())?;
        let thread_key = CatalogKey { parent_cnid: r, name: Vec::new() };
        let thread = ThreadRecord { parent_cnid: new_parent, name: new_name_bytes, is_dir };
        catalog.insert(&mut self.store, &mut allocator, thread_key.to_bytes(), CatalogRecord::Thread(thread).to_bytes())?;

        if old_key.parent_cnid != new_parent {
            self.bump_valence(old_key.parent_cnid, -1)?;
            self.bump_valence(new_parent, 1)?;
        }
        Ok(())
    }

    fn add_rsrc_fork(&mut self, r: Self::EntryRef) -> Result<()> {
        // Every HFS file record already carries a (possibly empty) resource
        // fork extent record (`spec.md` §4.8); there is nothing to add.
        let (_, rec) = self.resolve(r)?;
        match rec {
            CatalogRecord::File(_) => Ok(()),
            _ => Err(Error::InvalidMode),
        }
    }

    /// `num` has no HFS analogue (no volume-number field) and is accepted
    /// but unused, mirroring `paleofs-dos::format`'s treatment of the
    /// parameter it doesn't need. `bootable` is likewise a no-op: HFS's boot
    /// blocks (logical blocks 0-1) sit outside the allocation-block space
    /// entirely, so there is nothing for the free bitmap to reserve.
    fn format(&mut self, name: &str, num: u32, bootable: bool) -> Result<()> {
        let _ = (num, bootable);
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let total_blocks = match self.store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Err(Error::InvalidImage),
        };
        if total_blocks < MIN_VOLUME_BLOCKS {
            return Err(Error::InvalidImage);
        }

        let mut alloc_block_size: u32 = 512;
        let mut blocks_per_alloc: u64 = 1;
        while total_blocks / blocks_per_alloc > u16::MAX as u64 {
            alloc_block_size *= 2;
            blocks_per_alloc *= 2;
        }

        let bitmap_start: u16 = 3;
        let rough_count = ((total_blocks.saturating_sub(bitmap_start as u64 + 2)) / blocks_per_alloc).min(u16::MAX as u64) as u16;
        let bitmap_blocks = bitmap::bitmap_blocks(rough_count) as u64;
        let alloc_block_start = bitmap_start as u64 + bitmap_blocks;
        let usable = total_blocks.saturating_sub(alloc_block_start + 1);
        let alloc_block_count = (usable / blocks_per_alloc).min(u16::MAX as u64) as u16;
        if alloc_block_count < 4 {
            return Err(Error::InvalidImage);
        }

        let volume_name: Vec<u8> = name.bytes().take(27).collect();
        let now = Utc::now();
        let mut mdb = MdbInfo {
            signature: HFS_SIGNATURE,
            created: now,
            modified: now,
            attributes: VolumeAttrs::empty(),
            root_file_count: 0,
            bitmap_start,
            alloc_search_ptr: 0,
            alloc_block_count,
            alloc_block_size,
            default_clump_size: alloc_block_size * 4,
            alloc_block_start: alloc_block_start as u16,
            next_cnid: FIRST_USER_CNID,
            free_blocks: alloc_block_count,
            volume_name: volume_name.clone(),
            backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
            backup_seq_num: 0,
            write_count: 0,
            extents_clump_size: alloc_block_size * 4,
            catalog_clump_size: alloc_block_size * 4,
            root_dir_count: 1,
            file_count: 0,
            dir_count: 1,
            finder_info: [0; 32],
            extents_file_size: 0,
            extents_first_extents: ExtDataRec::EMPTY,
            catalog_file_size: 0,
            catalog_first_extents: ExtDataRec::EMPTY,
        };

        let mut bitmap = AllocMap::new(alloc_block_count as u64, 0);
        self.store.write_block(2, &mdb_block(&mdb))?;

        let extents_fork = ForkStorage::new(EXTENTS_FILE_CNID, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut extents_allocator = MapAllocator(&mut bitmap);
        let extents_tree = BTree::format(&mut self.store, extents_fork, &mut extents_allocator, extent_cmp as KeyCmp)?;

        let catalog_fork = ForkStorage::new(CATALOG_FILE_CNID, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut catalog_allocator = MapAllocator(&mut bitmap);
        let mut catalog_tree = BTree::format(&mut self.store, catalog_fork, &mut catalog_allocator, catalog_cmp as KeyCmp)?;

        mdb.extents_first_extents = extents_tree.fork.first_extents;
        mdb.extents_file_size = extents_tree.fork.total_blocks(&self.store, &crate::storage::NoOverflow) as u32 * alloc_block_size;
        mdb.catalog_first_extents = catalog_tree.fork.first_extents;
        mdb.catalog_file_size = catalog_tree.fork.total_blocks(&self.store, &crate::storage::NoOverflow) as u32 * alloc_block_size;

        let root_key = CatalogKey { parent_cnid: ROOT_PARENT_ID, name: volume_name.clone() };
        let root_dir = CatalogRecord::Dir(DirRecord {
            cnid: ROOT_DIR_ID,
            locked: false,
            valence: 0,
            created: now,
            modified: now,
            backup: Utc.timestamp_opt(0, 0).single().unwrap(),
            finder_info: [0; 32],
        });
        let root_thread = CatalogRecord::Thread(ThreadRecord {
            parent_cnid: ROOT_PARENT_ID,
            name: volume_name,
            is_dir: true,
        });
        let mut catalog_allocator = MapAllocator(&mut bitmap);
        catalog_tree.insert(&mut self.store, &mut catalog_allocator, root_key.to_bytes(), root_dir.to_bytes())?;
        let root_thread_key = CatalogKey { parent_cnid: ROOT_DIR_ID, name: Vec::new() };
        catalog_tree.insert(&mut self.store, &mut catalog_allocator, root_thread_key.to_bytes(), root_thread.to_bytes())?;

        mdb.free_blocks = bitmap.count_free() as u16;
        self.store.write_block(2, &mdb_block(&mdb))?;
        let last_block = total_blocks.saturating_sub(2);
        self.store.write_block(last_block, &mdb_block(&mdb))?;
        bitmap::store_bitmap(&mut self.store, mdb.bitmap_start as u64, mdb.alloc_block_count, &bitmap)?;

        self.mdb = mdb;
        self.bitmap = bitmap;
        self.catalog = Some(catalog_tree);
        self.extents = Some(extents_tree);
        self.notes.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.mdb.free_blocks = self.bitmap.count_free() as u16;
        if let Some(catalog) = &self.catalog {
            self.mdb.catalog_first_extents = catalog.fork.first_extents;
        }
        if let Some(extents) = &self.extents {
            self.mdb.extents_first_extents = extents.fork.first_extents;
        }
        self.store.write_block(2, &mdb_block(&self.mdb))?;
        let total_blocks = match self.store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Err(Error::InvalidImage),
        };
        self.store.write_block(total_blocks.saturating_sub(2), &mdb_block(&self.mdb))?;
        bitmap::store_bitmap(&mut self.store, self.mdb.bitmap_start as u64, self.mdb.alloc_block_count, &self.bitmap)?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.store.is_read_only() || self.access_level == AccessLevel::ReadOnly
    }

    fn set_access_level(&mut self, level: AccessLevel) {
        self.access_level = level;
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }

    fn notes_mut(&mut self) -> &mut Notes {
        &mut self.notes
    }
}

/// A read-only view over the extents-overflow tree, for call sites that
/// only need [`OverflowExtents::extra_extents`] and so can't take the `&mut
/// BTree` [`TreeOverflow`] wants (it implements the full, mutating trait to
/// satisfy the trait object bound, but its mutating methods are never
/// reached through this wrapper in practice since those call sites always
/// already hold an exclusive borrow elsewhere).
struct ReadOnlyOverflow<'a>(&'a BTree<KeyCmp>);

impl OverflowExtents for ReadOnlyOverflow<'_> {
    fn extra_extents(&self, store: &dyn ChunkStore, cnid: u32, fork: Fork) -> Vec<ExtDescriptor> {
        let start = ExtentKey { file_cnid: cnid, fork, first_ablk: 0 }.to_bytes();
        let entries = self
            .0
            .scan(store, &start, |k, _| {
                ExtentKey::from_bytes(k).map(|ek| ek.file_cnid == cnid && ek.fork == fork).unwrap_or(false)
            })
            .unwrap_or_default();
        entries.into_iter().filter_map(|(_, data)| decode_ext(&data)).collect()
    }

    fn append_extent(
        &mut self,
        _store: &mut dyn ChunkStore,
        _allocator: &mut dyn BlockAllocator,
        _cnid: u32,
        _fork: Fork,
        _ext: ExtDescriptor,
    ) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn remove_last_extent(&mut self, _store: &mut dyn ChunkStore, _cnid: u32, _fork: Fork) -> Result<Option<ExtDescriptor>> {
        Err(Error::NotSupported)
    }
}
