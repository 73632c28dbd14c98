//! Per-file byte storage over ProDOS's seedling/sapling/tree indirection
//! (`spec.md` §4.9). Index blocks store 256 two-byte block pointers split
//! low/high across the block's two halves (low bytes at `0..256`, high
//! bytes at `256..512`), the layout every ProDOS implementation uses so an
//! all-zero block reads back as "no index blocks allocated yet".

use paleofs_core::Error;
use paleofs_io::ChunkStore;

use crate::structures::StorageType;

pub trait BlockAllocator {
    fn alloc_block(&mut self) -> Result<u16, Error>;
    fn free_block(&mut self, block: u16) -> Result<(), Error>;
}

fn read_index_entry(index_block: &[u8; 512], slot: usize) -> u16 {
    index_block[slot] as u16 | ((index_block[256 + slot] as u16) << 8)
}

fn write_index_entry(index_block: &mut [u8; 512], slot: usize, value: u16) {
    index_block[slot] = (value & 0xFF) as u8;
    index_block[256 + slot] = (value >> 8) as u8;
}

/// A fork's storage shape: seedling (direct block), sapling (one index
/// block), or tree (master index of up to 128 index blocks). `eof` and
/// `storage_type` live on the catalog entry; this type only knows how to
/// translate a logical block index to a data block number and grow/shrink
/// the indirection structure around it.
pub struct ProdosFork {
    pub storage_type: StorageType,
    pub key_pointer: u16,
}

impl ProdosFork {
    pub fn new(storage_type: StorageType, key_pointer: u16) -> Self {
        Self { storage_type, key_pointer }
    }

    /// Data block number for logical block `index`, or `None` for a sparse
    /// hole (pointer `0`) or an index past the current structure's reach.
    pub fn data_block_num(&self, store: &dyn ChunkStore, index: u32) -> Result<Option<u16>, Error> {
        match self.storage_type {
            StorageType::Deleted => Ok(None),
            StorageType::Seedling => {
                Ok(if index == 0 && self.key_pointer != 0 { Some(self.key_pointer) } else { None })
            }
            StorageType::Sapling => {
                if index >= 256 {
                    return Ok(None);
                }
                let idx_block = read_block(store, self.key_pointer)?;
                let ptr = read_index_entry(&idx_block, index as usize);
                Ok(if ptr == 0 { None } else { Some(ptr) })
            }
            StorageType::Tree => {
                let master_slot = (index / 256) as usize;
                let sub_slot = (index % 256) as usize;
                if master_slot >= 128 {
                    return Ok(None);
                }
                let master = read_block(store, self.key_pointer)?;
                let idx_ptr = read_index_entry(&master, master_slot);
                if idx_ptr == 0 {
                    return Ok(None);
                }
                let idx_block = read_block(store, idx_ptr)?;
                let ptr = read_index_entry(&idx_block, sub_slot);
                Ok(if ptr == 0 { None } else { Some(ptr) })
            }
            StorageType::PascalArea | StorageType::Forked | StorageType::SubdirEntry | StorageType::SubdirHeader | StorageType::VolumeHeader => {
                Err(Error::InvalidMode)
            }
        }
    }

    /// Returns the data block for logical block `index`, allocating it (and
    /// growing the index structure, upgrading seedling->sapling->tree as
    /// needed) if it doesn't exist yet.
    pub fn ensure_block(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        index: u32,
    ) -> Result<u16, Error> {
        if index >= 256 * 128 {
            return Err(Error::FileTooLarge);
        }
        if self.storage_type == StorageType::Deleted {
            self.storage_type = StorageType::Seedling;
            self.key_pointer = 0;
        }
        if self.storage_type == StorageType::Seedling {
            if index == 0 {
                if self.key_pointer == 0 {
                    self.key_pointer = allocator.alloc_block()?;
                }
                return Ok(self.key_pointer);
            }
            self.upgrade_to_sapling(store, allocator)?;
        }
        if self.storage_type == StorageType::Sapling && index >= 256 {
            self.upgrade_to_tree(store, allocator)?;
        }
        match self.storage_type {
            StorageType::Sapling => {
                let mut idx_block = read_block(store, self.key_pointer)?;
                let existing = read_index_entry(&idx_block, index as usize);
                if existing != 0 {
                    return Ok(existing);
                }
                let block = allocator.alloc_block()?;
                write_index_entry(&mut idx_block, index as usize, block);
                write_block(store, self.key_pointer, &idx_block)?;
                Ok(block)
            }
            StorageType::Tree => {
                let master_slot = (index / 256) as usize;
                let sub_slot = (index % 256) as usize;
                let mut master = read_block(store, self.key_pointer)?;
                let mut idx_ptr = read_index_entry(&master, master_slot);
                if idx_ptr == 0 {
                    idx_ptr = allocator.alloc_block()?;
                    write_index_entry(&mut master, master_slot, idx_ptr);
                    write_block(store, self.key_pointer, &master)?;
                }
                let mut idx_block = read_block(store, idx_ptr)?;
                let existing = read_index_entry(&idx_block, sub_slot);
                if existing != 0 {
                    return Ok(existing);
                }
                let block = allocator.alloc_block()?;
                write_index_entry(&mut idx_block, sub_slot, block);
                write_block(store, idx_ptr, &idx_block)?;
                Ok(block)
            }
            _ => unreachable!("upgraded above"),
        }
    }

    fn upgrade_to_sapling(&mut self, store: &mut dyn ChunkStore, allocator: &mut dyn BlockAllocator) -> Result<(), Error> {
        let data_block = self.key_pointer;
        let idx_block_num = allocator.alloc_block()?;
        let mut idx_block = [0u8; 512];
        if data_block != 0 {
            write_index_entry(&mut idx_block, 0, data_block);
        }
        write_block(store, idx_block_num, &idx_block)?;
        self.storage_type = StorageType::Sapling;
        self.key_pointer = idx_block_num;
        Ok(())
    }

    fn upgrade_to_tree(&mut self, store: &mut dyn ChunkStore, allocator: &mut dyn BlockAllocator) -> Result<(), Error> {
        let sole_index = self.key_pointer;
        let master_num = allocator.alloc_block()?;
        let mut master = [0u8; 512];
        write_index_entry(&mut master, 0, sole_index);
        write_block(store, master_num, &master)?;
        self.storage_type = StorageType::Tree;
        self.key_pointer = master_num;
        Ok(())
    }

    /// Releases every data (and now-empty index/master-index) block for
    /// logical blocks `>= keep_blocks`. Does not downgrade `storage_type`
    /// back down on shrink (a documented simplification: a once-grown tree
    /// file stays tree-shaped even if truncated back to one block).
    pub fn trim_to(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        keep_blocks: u32,
    ) -> Result<(), Error> {
        match self.storage_type {
            StorageType::Deleted => Ok(()),
            StorageType::Seedling => {
                if keep_blocks == 0 && self.key_pointer != 0 {
                    allocator.free_block(self.key_pointer)?;
                    self.key_pointer = 0;
                    self.storage_type = StorageType::Deleted;
                }
                Ok(())
            }
            StorageType::Sapling => {
                let mut idx_block = read_block(store, self.key_pointer)?;
                let mut dirty = false;
                for slot in (keep_blocks as usize..256).rev() {
                    let ptr = read_index_entry(&idx_block, slot);
                    if ptr != 0 {
                        allocator.free_block(ptr)?;
                        write_index_entry(&mut idx_block, slot, 0);
                        dirty = true;
                    }
                }
                if dirty {
                    write_block(store, self.key_pointer, &idx_block)?;
                }
                if keep_blocks == 0 {
                    allocator.free_block(self.key_pointer)?;
                    self.key_pointer = 0;
                    self.storage_type = StorageType::Deleted;
                }
                Ok(())
            }
            StorageType::Tree => {
                let keep_master_slot = (keep_blocks / 256) as usize;
                let keep_sub_slot = (keep_blocks % 256) as usize;
                let mut master = read_block(store, self.key_pointer)?;
                let mut master_dirty = false;
                for master_slot in (0..128).rev() {
                    let idx_ptr = read_index_entry(&master, master_slot);
                    if idx_ptr == 0 {
                        continue;
                    }
                    if master_slot > keep_master_slot {
                        let mut idx_block = read_block(store, idx_ptr)?;
                        for slot in 0..256 {
                            let ptr = read_index_entry(&idx_block, slot);
                            if ptr != 0 {
                                allocator.free_block(ptr)?;
                            }
                        }
                        let _ = &mut idx_block;
                        allocator.free_block(idx_ptr)?;
                        write_index_entry(&mut master, master_slot, 0);
                        master_dirty = true;
                    } else if master_slot == keep_master_slot {
                        let mut idx_block = read_block(store, idx_ptr)?;
                        let mut idx_dirty = false;
                        for slot in (keep_sub_slot..256).rev() {
                            let ptr = read_index_entry(&idx_block, slot);
                            if ptr != 0 {
                                allocator.free_block(ptr)?;
                                write_index_entry(&mut idx_block, slot, 0);
                                idx_dirty = true;
                            }
                        }
                        if idx_dirty {
                            write_block(store, idx_ptr, &idx_block)?;
                        }
                        if keep_sub_slot == 0 && keep_blocks == 0 {
                            allocator.free_block(idx_ptr)?;
                            write_index_entry(&mut master, master_slot, 0);
                            master_dirty = true;
                        }
                    }
                }
                if master_dirty {
                    write_block(store, self.key_pointer, &master)?;
                }
                if keep_blocks == 0 {
                    allocator.free_block(self.key_pointer)?;
                    self.key_pointer = 0;
                    self.storage_type = StorageType::Deleted;
                }
                Ok(())
            }
            StorageType::PascalArea | StorageType::Forked | StorageType::SubdirEntry | StorageType::SubdirHeader | StorageType::VolumeHeader => {
                Err(Error::InvalidMode)
            }
        }
    }

    pub fn read_at(&self, store: &dyn ChunkStore, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let mut done = 0usize;
        while done < buf.len() {
            let byte_offset = offset + done as u64;
            let index = (byte_offset / 512) as u32;
            let in_block = (byte_offset % 512) as usize;
            let n = (512 - in_block).min(buf.len() - done);
            match self.data_block_num(store, index)? {
                Some(block) => {
                    let tmp = read_block(store, block)?;
                    buf[done..done + n].copy_from_slice(&tmp[in_block..in_block + n]);
                }
                None => buf[done..done + n].fill(0),
            }
            done += n;
        }
        Ok(())
    }

    pub fn write_at(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        offset: u64,
        buf: &[u8],
    ) -> Result<(), Error> {
        let mut done = 0usize;
        while done < buf.len() {
            let byte_offset = offset + done as u64;
            let index = (byte_offset / 512) as u32;
            let in_block = (byte_offset % 512) as usize;
            let n = (512 - in_block).min(buf.len() - done);
            let block = self.ensure_block(store, allocator, index)?;
            if n < 512 {
                let mut tmp = read_block(store, block)?;
                tmp[in_block..in_block + n].copy_from_slice(&buf[done..done + n]);
                write_block(store, block, &tmp)?;
            } else {
                let chunk: &[u8; 512] = buf[done..done + 512].try_into().unwrap();
                write_block(store, block, chunk)?;
            }
            done += n;
        }
        Ok(())
    }
}

fn read_block(store: &dyn ChunkStore, block: u16) -> Result<[u8; 512], Error> {
    let mut buf = [0u8; 512];
    store.read_block(block as u64, &mut buf)?;
    Ok(buf)
}

fn write_block(store: &mut dyn ChunkStore, block: u16, data: &[u8; 512]) -> Result<(), Error> {
    store.write_block(block as u64, data)?;
    Ok(())
}
