//! The `paleofs_core::Engine` implementation for ProDOS volumes (`spec.md`
//! §4.9). The directory tree is a chain of 512-byte blocks rooted at block
//! 2; an entry's identity is where it lives in that chain, so
//! [`Engine::EntryRef`] here is a `(block, slot)` pair rather than a
//! synthesized id.
//!
//! Resource forks (`storage_type == Forked`) are out of scope for this pass
//! (`DESIGN.md`); every file here is a plain seedling/sapling/tree data
//! fork.

use chrono::Utc;
use paleofs_common::{AllocMap, FileId, Owner, VolumeUsage};
use paleofs_core::engine::{CreateMode, Engine};
use paleofs_core::entry::{Access, DirEntry, EntryStatus, Sizes, Timestamps, TypeInfo};
use paleofs_core::error::{Error, Result};
use paleofs_core::notes::Notes;
use paleofs_core::tracker::{OpenMode, Part};
use paleofs_io::{AccessLevel, ChunkStore, Geometry};

use crate::bitmap;
use crate::storage::{BlockAllocator, ProdosFork};
use crate::structures::{
    FileEntryInfo, StorageType, SubdirHeader, VolumeHeader, ENTRIES_PER_BLOCK, ENTRY_LEN,
};
use crate::structures::entry::ACCESS_DEFAULT;

const ROOT_BLOCK: u16 = 2;
const DEFAULT_BITMAP_START: u16 = 6;
const MIN_VOLUME_BLOCKS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProdosRef {
    pub block: u16,
    pub slot: u8,
}

struct MapAllocator<'a>(&'a mut AllocMap);

impl BlockAllocator for MapAllocator<'_> {
    fn alloc_block(&mut self) -> Result<u16> {
        Ok(self.0.alloc(Owner::System)? as u16)
    }
    fn free_block(&mut self, block: u16) -> Result<()> {
        self.0.free(block as u64)
    }
}

/// Per-file allocator: blocks an individual file grows into are owned by
/// that file, not `System`, so `scan_usage`'s cross-check attributes them
/// correctly.
struct FileAllocator<'a> {
    map: &'a mut AllocMap,
    owner: FileId,
}

impl BlockAllocator for FileAllocator<'_> {
    fn alloc_block(&mut self) -> Result<u16> {
        Ok(self.map.alloc(Owner::File(self.owner))? as u16)
    }
    fn free_block(&mut self, block: u16) -> Result<()> {
        self.map.free(block as u64)
    }
}

fn file_id(block: u16, slot: u8) -> FileId {
    FileId::new(((block as u64) << 8) | slot as u64)
}

fn extract_entry(block: &[u8; 512], slot: usize) -> [u8; ENTRY_LEN] {
    let start = 4 + slot * ENTRY_LEN;
    block[start..start + ENTRY_LEN].try_into().expect("slot within block bounds")
}

fn place_entry(block: &mut [u8; 512], slot: usize, bytes: &[u8; ENTRY_LEN]) {
    let start = 4 + slot * ENTRY_LEN;
    block[start..start + ENTRY_LEN].copy_from_slice(bytes);
}

fn next_link(block: &[u8; 512]) -> u16 {
    u16::from_le_bytes([block[2], block[3]])
}

fn set_next_link(block: &mut [u8; 512], next: u16) {
    block[2..4].copy_from_slice(&next.to_le_bytes());
}

fn set_prev_link(block: &mut [u8; 512], prev: u16) {
    block[0..2].copy_from_slice(&prev.to_le_bytes());
}

fn access_to_common(byte: u8) -> Access {
    let mut access = Access::empty();
    if byte & crate::structures::entry::ACCESS_WRITE == 0 {
        access |= Access::LOCKED;
    }
    if byte & crate::structures::entry::ACCESS_BACKUP != 0 {
        access |= Access::BACKUP_OK;
    }
    if byte & crate::structures::entry::ACCESS_RENAME != 0 {
        access |= Access::RENAME_OK;
    }
    if byte & crate::structures::entry::ACCESS_DESTROY != 0 {
        access |= Access::DESTROY_OK;
    }
    access
}

pub struct ProdosEngine<S: ChunkStore> {
    store: S,
    bitmap: AllocMap,
    bitmap_start: u16,
    total_blocks: u16,
    access_level: AccessLevel,
    notes: Notes,
}

impl<S: ChunkStore> ProdosEngine<S> {
    pub fn mount(store: S) -> Result<Self> {
        let total_blocks = match store.geometry() {
            Geometry::Blocked { block_count } => block_count as u16,
            Geometry::Sectored { .. } => return Err(Error::InvalidImage),
        };
        let mut block = [0u8; 512];
        store.read_block(ROOT_BLOCK as u64, &mut block)?;
        let raw = extract_entry(&block, 0);
        let header = VolumeHeader::from_bytes(&raw).ok_or(Error::InvalidImage)?;
        if header.entry_length as usize != ENTRY_LEN || header.entries_per_block as usize != ENTRIES_PER_BLOCK {
            return Err(Error::InvalidImage);
        }
        let bitmap = bitmap::load(&store, header.bit_map_pointer, header.total_blocks)?;
        Ok(Self {
            store,
            bitmap,
            bitmap_start: header.bit_map_pointer,
            total_blocks,
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        })
    }

    pub fn blank(store: S) -> Self {
        Self {
            store,
            bitmap: AllocMap::new(0, 0),
            bitmap_start: DEFAULT_BITMAP_START,
            total_blocks: 0,
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn read_dir_block(&self, block: u16) -> Result<[u8; 512]> {
        let mut buf = [0u8; 512];
        self.store.read_block(block as u64, &mut buf)?;
        Ok(buf)
    }

    fn write_dir_block(&mut self, block: u16, data: &[u8; 512]) -> Result<()> {
        self.store.write_block(block as u64, data)?;
        Ok(())
    }

    fn dir_start_for(&self, parent: ProdosRef) -> Result<u16> {
        if parent.slot == 0 {
            return Ok(parent.block);
        }
        let block = self.read_dir_block(parent.block)?;
        let raw = extract_entry(&block, parent.slot as usize);
        let f = FileEntryInfo::from_bytes(&raw).ok_or(Error::Damaged)?;
        if f.storage_type != StorageType::SubdirEntry {
            return Err(Error::InvalidMode);
        }
        Ok(f.key_pointer)
    }

    fn file_at(&self, r: ProdosRef) -> Result<FileEntryInfo> {
        let block = self.read_dir_block(r.block)?;
        let raw = extract_entry(&block, r.slot as usize);
        FileEntryInfo::from_bytes(&raw).ok_or(Error::Damaged)
    }

    fn put_file_at(&mut self, r: ProdosRef, info: &FileEntryInfo) -> Result<()> {
        let mut block = self.read_dir_block(r.block)?;
        place_entry(&mut block, r.slot as usize, &info.to_bytes());
        self.write_dir_block(r.block, &block)
    }

    /// Finds a free slot in the directory chain rooted at `dir_start`,
    /// growing the chain with a freshly-allocated block if every existing
    /// block is full (`spec.md` §4.9: "a directory grows by linking a new
    /// block onto its chain, never by moving existing entries").
    fn alloc_slot(&mut self, dir_start: u16) -> Result<ProdosRef> {
        let mut block_num = dir_start;
        let mut first = true;
        loop {
            let raw_block = self.read_dir_block(block_num)?;
            let start_slot = if first { 1 } else { 0 };
            for slot in start_slot..ENTRIES_PER_BLOCK {
                let raw = extract_entry(&raw_block, slot);
                if raw[0] >> 4 == StorageType::Deleted.to_nibble() {
                    return Ok(ProdosRef { block: block_num, slot: slot as u8 });
                }
            }
            let next = next_link(&raw_block);
            if next == 0 {
                let new_block_num = {
                    let mut allocator = MapAllocator(&mut self.bitmap);
                    allocator.alloc_block()?
                };
                let mut new_block = [0u8; 512];
                set_prev_link(&mut new_block, block_num);
                self.write_dir_block(new_block_num, &new_block)?;
                let mut updated = raw_block;
                set_next_link(&mut updated, new_block_num);
                self.write_dir_block(block_num, &updated)?;
                return Ok(ProdosRef { block: new_block_num, slot: 0 });
            }
            block_num = next;
            first = false;
        }
    }

    fn bump_file_count(&mut self, dir_start: u16, delta: i32) -> Result<()> {
        let mut block = self.read_dir_block(dir_start)?;
        let raw = extract_entry(&block, 0);
        if let Some(mut vh) = VolumeHeader::from_bytes(&raw) {
            vh.file_count = (vh.file_count as i32 + delta).max(0) as u16;
            place_entry(&mut block, 0, &vh.to_bytes());
        } else if let Some(mut sh) = SubdirHeader::from_bytes(&raw) {
            sh.file_count = (sh.file_count as i32 + delta).max(0) as u16;
            place_entry(&mut block, 0, &sh.to_bytes());
        } else {
            return Err(Error::Damaged);
        }
        self.write_dir_block(dir_start, &block)
    }

    fn fork(&self, info: &FileEntryInfo) -> ProdosFork {
        ProdosFork::new(info.storage_type, info.key_pointer)
    }

    fn mark_fork(&self, usage: &mut VolumeUsage, owner: Owner, fork: &ProdosFork, eof: u32) -> Result<()> {
        let logical = (eof as u64).div_ceil(512) as u32;
        match fork.storage_type {
            StorageType::Seedling => {
                if fork.key_pointer != 0 {
                    usage.set_owner(fork.key_pointer as u64, owner);
                }
            }
            StorageType::Sapling => {
                usage.set_owner(fork.key_pointer as u64, owner);
                for i in 0..logical.min(256) {
                    if let Some(b) = fork.data_block_num(&self.store, i)? {
                        usage.set_owner(b as u64, owner);
                    }
                }
            }
            StorageType::Tree => {
                usage.set_owner(fork.key_pointer as u64, owner);
                let master = self.read_dir_block(fork.key_pointer)?;
                for master_slot in 0..128usize {
                    let idx_ptr = u16::from_le_bytes([master[master_slot], master[256 + master_slot]]);
                    if idx_ptr != 0 {
                        usage.set_owner(idx_ptr as u64, owner);
                    }
                }
                for i in 0..logical {
                    if let Some(b) = fork.data_block_num(&self.store, i)? {
                        usage.set_owner(b as u64, owner);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl<S: ChunkStore> Engine for ProdosEngine<S> {
    type EntryRef = ProdosRef;

    fn root(&self) -> Self::EntryRef {
        ProdosRef { block: ROOT_BLOCK, slot: 0 }
    }

    fn entry(&self, r: Self::EntryRef) -> Result<DirEntry> {
        let block = self.read_dir_block(r.block)?;
        let raw = extract_entry(&block, r.slot as usize);
        let nibble = raw[0] >> 4;
        match StorageType::from_nibble(nibble) {
            Some(StorageType::VolumeHeader) => {
                let h = VolumeHeader::from_bytes(&raw).ok_or(Error::Damaged)?;
                Ok(DirEntry {
                    name: h.raw_name.iter().map(|&b| b as char).collect(),
                    raw_name: h.raw_name,
                    access: access_to_common(h.access),
                    type_info: TypeInfo::VolumeDirectory,
                    sizes: Sizes::default(),
                    timestamps: Timestamps { created: h.created, modified: None },
                    status: EntryStatus::default(),
                })
            }
            Some(StorageType::SubdirHeader) => {
                let h = SubdirHeader::from_bytes(&raw).ok_or(Error::Damaged)?;
                Ok(DirEntry {
                    name: h.raw_name.iter().map(|&b| b as char).collect(),
                    raw_name: h.raw_name,
                    access: access_to_common(h.access),
                    type_info: TypeInfo::Directory,
                    sizes: Sizes::default(),
                    timestamps: Timestamps { created: h.created, modified: None },
                    status: EntryStatus::default(),
                })
            }
            Some(StorageType::Deleted) | None => Err(Error::NotFound),
            Some(_) => {
                let f = FileEntryInfo::from_bytes(&raw).ok_or(Error::Damaged)?;
                let type_info = if f.storage_type == StorageType::SubdirEntry {
                    TypeInfo::Directory
                } else {
                    TypeInfo::Prodos {
                        storage_type: f.storage_type.to_nibble(),
                        file_type: f.file_type,
                        aux_type: f.aux_type,
                    }
                };
                Ok(DirEntry {
                    name: f.name(),
                    access: access_to_common(f.access),
                    raw_name: f.raw_name,
                    type_info,
                    sizes: Sizes {
                        data_len: f.eof as u64,
                        rsrc_len: 0,
                        storage_len: f.blocks_used as u64 * 512,
                    },
                    timestamps: Timestamps { created: f.created, modified: f.modified },
                    status: EntryStatus::default(),
                })
            }
        }
    }

    fn children(&self, parent: Self::EntryRef) -> Result<Vec<Self::EntryRef>> {
        let mut out = Vec::new();
        let mut block_num = self.dir_start_for(parent)?;
        let mut first = true;
        loop {
            let raw_block = self.read_dir_block(block_num)?;
            let start_slot = if first { 1 } else { 0 };
            for slot in start_slot..ENTRIES_PER_BLOCK {
                let raw = extract_entry(&raw_block, slot);
                if raw[0] >> 4 != StorageType::Deleted.to_nibble() {
                    out.push(ProdosRef { block: block_num, slot: slot as u8 });
                }
            }
            let next = next_link(&raw_block);
            if next == 0 {
                break;
            }
            block_num = next;
            first = false;
        }
        Ok(out)
    }

    fn supports_part(&self, part: Part) -> bool {
        matches!(part, Part::DataFork | Part::RawData)
    }

    fn scan_usage(&mut self) -> Result<VolumeUsage> {
        let mut usage = VolumeUsage::new();
        usage.set_owner(0, Owner::System);
        usage.set_owner(1, Owner::System);
        let bitmap_blocks = bitmap::bitmap_blocks(self.total_blocks) as u64;
        for b in 0..bitmap_blocks {
            usage.set_owner(self.bitmap_start as u64 + b, Owner::System);
        }

        fn walk<S: ChunkStore>(engine: &ProdosEngine<S>, usage: &mut VolumeUsage, dir_start: u16) -> Result<()> {
            let mut block_num = dir_start;
            let mut first = true;
            loop {
                usage.set_owner(block_num as u64, Owner::System);
                let raw_block = engine.read_dir_block(block_num)?;
                let start_slot = if first { 1 } else { 0 };
                for slot in start_slot..ENTRIES_PER_BLOCK {
                    let raw = extract_entry(&raw_block, slot);
                    let nibble = raw[0] >> 4;
                    let Some(st) = StorageType::from_nibble(nibble) else { continue };
                    if st == StorageType::Deleted {
                        continue;
                    }
                    let Some(f) = FileEntryInfo::from_bytes(&raw) else { continue };
                    if st == StorageType::SubdirEntry {
                        walk(engine, usage, f.key_pointer)?;
                    } else {
                        let owner = Owner::File(file_id(block_num, slot as u8));
                        let fork = engine.fork(&f);
                        engine.mark_fork(usage, owner, &fork, f.eof)?;
                    }
                }
                let next = next_link(&raw_block);
                if next == 0 {
                    break;
                }
                block_num = next;
                first = false;
            }
            Ok(())
        }
        walk(self, &mut usage, ROOT_BLOCK)?;
        Ok(usage)
    }

    fn read_at(&mut self, r: Self::EntryRef, part: Part, _mode: OpenMode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let _ = part;
        let f = self.file_at(r)?;
        let available = (f.eof as u64).saturating_sub(offset);
        let want = (buf.len() as u64).min(available) as usize;
        if want > 0 {
            let fork = self.fork(&f);
            fork.read_at(&self.store, offset, &mut buf[..want])?;
        }
        Ok(want)
    }

    fn write_at(&mut self, r: Self::EntryRef, part: Part, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let _ = part;
        let mut f = self.file_at(r)?;
        let mut fork = self.fork(&f);
        let owner = file_id(r.block, r.slot);
        {
            let mut allocator = FileAllocator { map: &mut self.bitmap, owner };
            fork.write_at(&mut self.store, &mut allocator, offset, buf)?;
        }
        f.storage_type = fork.storage_type;
        f.key_pointer = fork.key_pointer;
        f.eof = f.eof.max((offset + buf.len() as u64) as u32);
        f.blocks_used = blocks_for(f.storage_type, (f.eof as u64).div_ceil(512) as u32);
        self.put_file_at(r, &f)?;
        Ok(buf.len())
    }

    fn len_of(&self, r: Self::EntryRef, _part: Part, _mode: OpenMode) -> Result<u64> {
        Ok(self.file_at(r)?.eof as u64)
    }

    fn set_len(&mut self, r: Self::EntryRef, _part: Part, new_len: u64) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let mut f = self.file_at(r)?;
        let mut fork = self.fork(&f);
        let owner = file_id(r.block, r.slot);
        let keep_blocks = new_len.div_ceil(512) as u32;
        {
            let mut allocator = FileAllocator { map: &mut self.bitmap, owner };
            fork.trim_to(&mut self.store, &mut allocator, keep_blocks)?;
        }
        f.storage_type = fork.storage_type;
        f.key_pointer = fork.key_pointer;
        f.eof = new_len as u32;
        f.blocks_used = blocks_for(f.storage_type, keep_blocks);
        self.put_file_at(r, &f)
    }

    fn next_data_or_hole(&self, r: Self::EntryRef, _part: Part, from: u64, want_hole: bool) -> Result<Option<u64>> {
        let f = self.file_at(r)?;
        let fork = self.fork(&f);
        let total = (f.eof as u64).div_ceil(512) as u32;
        let mut index = (from / 512) as u32;
        while index < total {
            let present = fork.data_block_num(&self.store, index)?.is_some();
            if present != want_hole {
                let byte = (index as u64 * 512).max(from);
                if byte < f.eof as u64 {
                    return Ok(Some(byte));
                }
            }
            index += 1;
        }
        Ok(None)
    }

    fn flush_descriptor(&mut self, _r: Self::EntryRef, _part: Part) -> Result<()> {
        Ok(())
    }

    fn create(&mut self, parent: Self::EntryRef, name: &str, create_mode: CreateMode) -> Result<Self::EntryRef> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if !paleofs_common::charset::is_valid_prodos_name(name) {
            return Err(Error::InvalidName);
        }
        let dir_start = self.dir_start_for(parent)?;
        for child in self.children(parent)? {
            if self.entry(child)?.name.eq_ignore_ascii_case(name) {
                return Err(Error::Exists);
            }
        }
        let slot = self.alloc_slot(dir_start)?;
        let now = Utc::now();

        match create_mode {
            CreateMode::Directory => {
                let new_block = {
                    let mut allocator = MapAllocator(&mut self.bitmap);
                    allocator.alloc_block()?
                };
                let mut new_dir = [0u8; 512];
                let header = SubdirHeader {
                    raw_name: name.as_bytes().to_vec(),
                    created: Some(now),
                    access: ACCESS_DEFAULT,
                    entry_length: ENTRY_LEN as u8,
                    entries_per_block: ENTRIES_PER_BLOCK as u8,
                    file_count: 0,
                    parent_pointer: parent.block,
                    parent_entry_number: slot.slot + 1,
                    parent_entry_length: ENTRY_LEN as u8,
                };
                place_entry(&mut new_dir, 0, &header.to_bytes());
                self.write_dir_block(new_block, &new_dir)?;

                let info = FileEntryInfo {
                    storage_type: StorageType::SubdirEntry,
                    raw_name: name.as_bytes().to_vec(),
                    file_type: 0x0F,
                    key_pointer: new_block,
                    blocks_used: 1,
                    eof: 512,
                    created: Some(now),
                    modified: Some(now),
                    access: ACCESS_DEFAULT,
                    aux_type: 0,
                    header_pointer: dir_start,
                };
                self.put_file_at(slot, &info)?;
            }
            CreateMode::File => {
                let info = FileEntryInfo {
                    storage_type: StorageType::Seedling,
                    raw_name: name.as_bytes().to_vec(),
                    file_type: 0x06,
                    key_pointer: 0,
                    blocks_used: 0,
                    eof: 0,
                    created: Some(now),
                    modified: Some(now),
                    access: ACCESS_DEFAULT,
                    aux_type: 0,
                    header_pointer: dir_start,
                };
                self.put_file_at(slot, &info)?;
            }
        }
        self.bump_file_count(dir_start, 1)?;
        Ok(slot)
    }

    fn delete(&mut self, r: Self::EntryRef) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if r.slot == 0 {
            return Err(Error::InvalidMode);
        }
        let f = self.file_at(r)?;
        if f.storage_type == StorageType::SubdirEntry {
            if !self.children(r)?.is_empty() {
                return Err(Error::NotSupported);
            }
            let mut allocator = MapAllocator(&mut self.bitmap);
            allocator.free_block(f.key_pointer)?;
        } else {
            let mut fork = self.fork(&f);
            let owner = file_id(r.block, r.slot);
            let mut allocator = FileAllocator { map: &mut self.bitmap, owner };
            fork.trim_to(&mut self.store, &mut allocator, 0)?;
        }
        let mut cleared = f;
        cleared.storage_type = StorageType::Deleted;
        cleared.raw_name.clear();
        cleared.key_pointer = 0;
        self.put_file_at(r, &cleared)?;
        let dir_start = self.dir_start_for(ProdosRef { block: r.block, slot: 0 })?;
        self.bump_file_count(dir_start, -1)
    }

    fn move_entry(&mut self, r: Self::EntryRef, new_parent: Self::EntryRef, new_name: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if r.slot == 0 {
            return Err(Error::NotSupported);
        }
        if !paleofs_common::charset::is_valid_prodos_name(new_name) {
            return Err(Error::InvalidName);
        }
        let mut f = self.file_at(r)?;
        let old_header_pointer = f.header_pointer;
        let new_dir_start = self.dir_start_for(new_parent)?;
        for child in self.children(new_parent)? {
            if child != r && self.entry(child)?.name.eq_ignore_ascii_case(new_name) {
                return Err(Error::Exists);
            }
        }

        if new_dir_start == old_header_pointer {
            f.raw_name = new_name.as_bytes().to_vec();
            f.header_pointer = new_dir_start;
            self.put_file_at(r, &f)?;
            return Ok(());
        }

        let new_slot = self.alloc_slot(new_dir_start)?;
        f.raw_name = new_name.as_bytes().to_vec();
        f.header_pointer = new_dir_start;
        self.put_file_at(new_slot, &f)?;

        let mut old_block = self.read_dir_block(r.block)?;
        place_entry(&mut old_block, r.slot as usize, &[0u8; ENTRY_LEN]);
        self.write_dir_block(r.block, &old_block)?;

        self.bump_file_count(old_header_pointer, -1)?;
        self.bump_file_count(new_dir_start, 1)?;
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _r: Self::EntryRef) -> Result<()> {
        // ProDOS resource forks (storage_type 5, extended files) are out of
        // scope for this pass; see DESIGN.md.
        Err(Error::NotSupported)
    }

    fn format(&mut self, name: &str, num: u32, bootable: bool) -> Result<()> {
        let _ = (num, bootable);
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if !paleofs_common::charset::is_valid_prodos_name(name) {
            return Err(Error::InvalidName);
        }
        let total_blocks = match self.store.geometry() {
            Geometry::Blocked { block_count } => block_count as u16,
            Geometry::Sectored { .. } => return Err(Error::InvalidImage),
        };
        if (total_blocks as u64) < MIN_VOLUME_BLOCKS {
            return Err(Error::InvalidImage);
        }

        let bitmap_start = DEFAULT_BITMAP_START;
        let bitmap_blocks = bitmap::bitmap_blocks(total_blocks) as u16;
        let mut bitmap = AllocMap::new(total_blocks as u64, 0);
        for b in 0..bitmap_start as u64 {
            bitmap.force_state(b, false, Some(Owner::System))?;
        }
        for b in bitmap_start as u64..(bitmap_start + bitmap_blocks) as u64 {
            bitmap.force_state(b, false, Some(Owner::System))?;
        }

        let now = Utc::now();
        let mut root_block = [0u8; 512];
        let header = VolumeHeader {
            raw_name: name.as_bytes().to_vec(),
            created: Some(now),
            access: ACCESS_DEFAULT,
            entry_length: ENTRY_LEN as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            bit_map_pointer: bitmap_start,
            total_blocks,
        };
        place_entry(&mut root_block, 0, &header.to_bytes());

        self.write_dir_block(ROOT_BLOCK, &root_block)?;
        bitmap::store_bitmap(&mut self.store, bitmap_start, total_blocks, &bitmap)?;

        self.bitmap = bitmap;
        self.bitmap_start = bitmap_start;
        self.total_blocks = total_blocks;
        self.notes.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        bitmap::store_bitmap(&mut self.store, self.bitmap_start, self.total_blocks, &self.bitmap)
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

fn blocks_for(storage_type: StorageType, logical_blocks: u32) -> u16 {
    let data = logical_blocks.min(256 * 128);
    let indirection = match storage_type {
        StorageType::Sapling => 1,
        StorageType::Tree => 1 + data.div_ceil(256),
        _ => 0,
    };
    (data + indirection).min(u16::MAX as u32) as u16
}
