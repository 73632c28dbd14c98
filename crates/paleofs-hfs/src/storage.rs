//! Per-fork byte storage over allocation blocks (`spec.md` §4.8 "FileStorage
//! model"): `alloc_block_num`, `extend`, and `trim`, layered over a file's
//! `ExtDataRec` plus, for regular files, extents-overflow records beyond the
//! first three.

use paleofs_core::Error;
use paleofs_io::ChunkStore;

use crate::structures::{ExtDataRec, ExtDescriptor, MdbInfo};

/// Allocates fresh allocation blocks for a growing file or tree.
pub trait BlockAllocator {
    fn alloc_block(&mut self) -> Result<u32, Error>;
}

/// Resolves extents-overflow fragments beyond the three a catalog/MDB
/// record carries directly. The extents-overflow B*-tree implements this;
/// B*-tree node files themselves never need one (they use [`NoOverflow`]).
pub trait OverflowExtents {
    fn extra_extents(
        &self,
        store: &dyn ChunkStore,
        cnid: u32,
        fork: crate::structures::Fork,
    ) -> Vec<ExtDescriptor>;

    fn append_extent(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        cnid: u32,
        fork: crate::structures::Fork,
        ext: ExtDescriptor,
    ) -> Result<(), Error>;

    fn remove_last_extent(
        &mut self,
        store: &mut dyn ChunkStore,
        cnid: u32,
        fork: crate::structures::Fork,
    ) -> Result<Option<ExtDescriptor>, Error>;
}

/// No-op overflow resolver for files that never grow past three extents,
/// and for the B*-tree node files themselves (`spec.md` §4.8: "B*-tree nodes
/// are always exactly 512 bytes ... stored as a logical byte stream via
/// FileStorage").
pub struct NoOverflow;

impl OverflowExtents for NoOverflow {
    fn extra_extents(
        &self,
        _store: &dyn ChunkStore,
        _cnid: u32,
        _fork: crate::structures::Fork,
    ) -> Vec<ExtDescriptor> {
        Vec::new()
    }
    fn append_extent(
        &mut self,
        _store: &mut dyn ChunkStore,
        _allocator: &mut dyn BlockAllocator,
        _cnid: u32,
        _fork: crate::structures::Fork,
        _ext: ExtDescriptor,
    ) -> Result<(), Error> {
        Err(Error::DiskFull)
    }
    fn remove_last_extent(
        &mut self,
        _store: &mut dyn ChunkStore,
        _cnid: u32,
        _fork: crate::structures::Fork,
    ) -> Result<Option<ExtDescriptor>, Error> {
        Ok(None)
    }
}

/// Byte-addressable view of one fork, backed by allocation blocks.
pub struct ForkStorage {
    pub cnid: u32,
    pub fork: crate::structures::Fork,
    pub first_extents: ExtDataRec,
    alloc_block_size: u32,
    alloc_block_start: u64,
}

impl ForkStorage {
    pub fn new(cnid: u32, fork: crate::structures::Fork, first_extents: ExtDataRec, mdb: &MdbInfo) -> Self {
        ForkStorage {
            cnid,
            fork,
            first_extents,
            alloc_block_size: mdb.alloc_block_size,
            alloc_block_start: mdb.alloc_block_start as u64,
        }
    }

    pub fn alloc_block_size_hint(&self) -> u32 {
        self.alloc_block_size
    }

    fn all_extents(&self, store: &dyn ChunkStore, overflow: &dyn OverflowExtents) -> Vec<ExtDescriptor> {
        let mut extents: Vec<ExtDescriptor> =
            self.first_extents.0.iter().copied().filter(|e| !e.is_empty()).collect();
        extents.extend(overflow.extra_extents(store, self.cnid, self.fork));
        extents
    }

    pub fn total_blocks(&self, store: &dyn ChunkStore, overflow: &dyn OverflowExtents) -> u32 {
        self.all_extents(store, overflow).iter().map(|e| e.num_abn as u32).sum()
    }

    /// Maps a logical allocation-block index within this fork to the
    /// volume-wide allocation block number.
    pub fn alloc_block_num(
        &self,
        store: &dyn ChunkStore,
        index: u32,
        overflow: &dyn OverflowExtents,
    ) -> Option<u32> {
        let mut remaining = index;
        for ext in self.all_extents(store, overflow) {
            if remaining < ext.num_abn as u32 {
                return Some(ext.start_abn as u32 + remaining);
            }
            remaining -= ext.num_abn as u32;
        }
        None
    }

    fn logical_block(&self, abn: u32) -> u64 {
        let blocks_per_alloc = self.alloc_block_size / 512;
        self.alloc_block_start + abn as u64 * blocks_per_alloc as u64
    }

    pub fn read_at(
        &self,
        store: &dyn ChunkStore,
        offset: u64,
        buf: &mut [u8],
        overflow: &dyn OverflowExtents,
    ) -> Result<(), Error> {
        let mut done = 0usize;
        while done < buf.len() {
            let byte_offset = offset + done as u64;
            let abn_index = (byte_offset / self.alloc_block_size as u64) as u32;
            let in_alloc = (byte_offset % self.alloc_block_size as u64) as usize;
            let abn = self
                .alloc_block_num(store, abn_index, overflow)
                .ok_or(Error::OutOfRange)?;
            let block_in_alloc = in_alloc / 512;
            let in_block = in_alloc % 512;
            let logical = self.logical_block(abn) + block_in_alloc as u64;
            let mut tmp = [0u8; 512];
            store.read_block(logical, &mut tmp)?;
            let n = (512 - in_block).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&tmp[in_block..in_block + n]);
            done += n;
        }
        Ok(())
    }

    pub fn write_at(
        &self,
        store: &mut dyn ChunkStore,
        offset: u64,
        buf: &[u8],
        overflow: &dyn OverflowExtents,
    ) -> Result<(), Error> {
        let mut done = 0usize;
        while done < buf.len() {
            let byte_offset = offset + done as u64;
            let abn_index = (byte_offset / self.alloc_block_size as u64) as u32;
            let in_alloc = (byte_offset % self.alloc_block_size as u64) as usize;
            let abn = self
                .alloc_block_num(store, abn_index, overflow)
                .ok_or(Error::OutOfRange)?;
            let block_in_alloc = in_alloc / 512;
            let in_block = in_alloc % 512;
            let logical = self.logical_block(abn) + block_in_alloc as u64;
            let n = (512 - in_block).min(buf.len() - done);
            if n < 512 {
                let mut tmp = [0u8; 512];
                store.read_block(logical, &mut tmp)?;
                tmp[in_block..in_block + n].copy_from_slice(&buf[done..done + n]);
                store.write_block(logical, &tmp)?;
            } else {
                let chunk: &[u8; 512] = buf[done..done + 512].try_into().unwrap();
                store.write_block(logical, chunk)?;
            }
            done += n;
        }
        Ok(())
    }

    /// Appends one allocation block, extending the last extent in place
    /// when `abn` is contiguous, or opening a new extent slot otherwise.
    /// Falls into the overflow tree once the direct three extents are full
    /// (`spec.md` §4.8).
    pub fn extend(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        abn: u32,
        overflow: &mut dyn OverflowExtents,
    ) -> Result<(), Error> {
        for ext in self.first_extents.0.iter_mut() {
            if ext.is_empty() {
                *ext = ExtDescriptor { start_abn: abn as u16, num_abn: 1 };
                return Ok(());
            }
            if ext.start_abn as u32 + ext.num_abn as u32 == abn {
                ext.num_abn += 1;
                return Ok(());
            }
        }
        overflow.append_extent(
            store,
            allocator,
            self.cnid,
            self.fork,
            ExtDescriptor { start_abn: abn as u16, num_abn: 1 },
        )
    }

    /// Releases the fork's last allocation block, shrinking or removing its
    /// owning extent. Returns the released allocation block number.
    pub fn trim_one(
        &mut self,
        store: &mut dyn ChunkStore,
        overflow: &mut dyn OverflowExtents,
    ) -> Result<Option<u32>, Error> {
        if let Some(ext) = overflow.remove_last_extent(store, self.cnid, self.fork)? {
            return Ok(Some(ext.start_abn as u32 + ext.num_abn as u32 - 1));
        }
        for ext in self.first_extents.0.iter_mut().rev() {
            if !ext.is_empty() {
                let released = ext.start_abn as u32 + ext.num_abn as u32 - 1;
                ext.num_abn -= 1;
                if ext.num_abn == 0 {
                    *ext = ExtDescriptor::EMPTY;
                }
                return Ok(Some(released));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{Fork, HFS_SIGNATURE, VolumeAttrs};
    use chrono::{TimeZone, Utc};
    use paleofs_io::{Geometry, MemStore, SectorOrdering};

    fn sample_mdb() -> MdbInfo {
        MdbInfo {
            signature: HFS_SIGNATURE,
            created: Utc.timestamp_opt(0, 0).single().unwrap(),
            modified: Utc.timestamp_opt(0, 0).single().unwrap(),
            attributes: VolumeAttrs::empty(),
            root_file_count: 0,
            bitmap_start: 3,
            alloc_search_ptr: 0,
            alloc_block_count: 100,
            alloc_block_size: 1024,
            default_clump_size: 4096,
            alloc_block_start: 6,
            next_cnid: 16,
            free_blocks: 90,
            volume_name: b"Test".to_vec(),
            backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
            backup_seq_num: 0,
            write_count: 0,
            extents_clump_size: 4096,
            catalog_clump_size: 4096,
            root_dir_count: 0,
            file_count: 0,
            dir_count: 0,
            finder_info: [0; 32],
            extents_file_size: 1024,
            extents_first_extents: ExtDataRec::EMPTY,
            catalog_file_size: 1024,
            catalog_first_extents: ExtDataRec::EMPTY,
        }
    }

    struct DummyAllocator;
    impl BlockAllocator for DummyAllocator {
        fn alloc_block(&mut self) -> Result<u32, Error> {
            Err(Error::DiskFull)
        }
    }

    fn blank_store() -> MemStore {
        MemStore::new(vec![0u8; 4096], Geometry::Blocked { block_count: 8 }, SectorOrdering::Physical)
    }

    #[test]
    fn extend_grows_contiguous_run_into_one_extent() {
        let mdb = sample_mdb();
        let mut store = blank_store();
        let mut allocator = DummyAllocator;
        let mut fork = ForkStorage::new(20, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut overflow = NoOverflow;
        fork.extend(&mut store, &mut allocator, 2, &mut overflow).unwrap();
        fork.extend(&mut store, &mut allocator, 3, &mut overflow).unwrap();
        fork.extend(&mut store, &mut allocator, 4, &mut overflow).unwrap();
        assert_eq!(fork.first_extents.0[0], ExtDescriptor { start_abn: 2, num_abn: 3 });
        assert_eq!(fork.total_blocks(&store, &overflow), 3);
    }

    #[test]
    fn extend_opens_new_extent_on_discontinuity() {
        let mdb = sample_mdb();
        let mut store = blank_store();
        let mut allocator = DummyAllocator;
        let mut fork = ForkStorage::new(20, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut overflow = NoOverflow;
        fork.extend(&mut store, &mut allocator, 2, &mut overflow).unwrap();
        fork.extend(&mut store, &mut allocator, 10, &mut overflow).unwrap();
        assert_eq!(fork.first_extents.0[0].num_abn, 1);
        assert_eq!(fork.first_extents.0[1], ExtDescriptor { start_abn: 10, num_abn: 1 });
    }

    #[test]
    fn trim_one_shrinks_then_empties_extent() {
        let mdb = sample_mdb();
        let mut store = blank_store();
        let mut allocator = DummyAllocator;
        let mut fork = ForkStorage::new(20, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut overflow = NoOverflow;
        fork.extend(&mut store, &mut allocator, 2, &mut overflow).unwrap();
        fork.extend(&mut store, &mut allocator, 3, &mut overflow).unwrap();
        assert_eq!(fork.trim_one(&mut store, &mut overflow).unwrap(), Some(3));
        assert_eq!(fork.trim_one(&mut store, &mut overflow).unwrap(), Some(2));
        assert!(fork.first_extents.0[0].is_empty());
        assert_eq!(fork.trim_one(&mut store, &mut overflow).unwrap(), None);
    }

    #[test]
    fn read_write_round_trip_across_an_alloc_block() {
        let mdb = sample_mdb();
        let mut store = blank_store();
        let mut allocator = DummyAllocator;
        let mut fork = ForkStorage::new(20, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut overflow = NoOverflow;
        fork.extend(&mut store, &mut allocator, 0, &mut overflow).unwrap();
        let data = b"hello hfs fork storage!";
        fork.write_at(&mut store, 0, data, &overflow).unwrap();
        let mut back = vec![0u8; data.len()];
        fork.read_at(&store, 0, &mut back, &overflow).unwrap();
        assert_eq!(&back, data);
    }
}
