//! HFS/MFS format probe (`spec.md` §4.4): unlike DOS, HFS carries an
//! explicit signature word, so this probe is a direct field read rather than
//! a structural walk. It still sanity-checks the geometry implied by the MDB
//! against the store's actual size before trusting the signature.

use paleofs_core::probe::{Confidence, FormatId, Probe};
use paleofs_io::{ChunkStore, Geometry};

use crate::structures::mdb::{MdbInfo, HFS_SIGNATURE, MDB_LEN, MFS_SIGNATURE};

pub struct HfsProbe;

impl Probe for HfsProbe {
    const FORMAT: FormatId = FormatId::Hfs;

    fn test(store: &dyn ChunkStore) -> Confidence {
        let total_blocks = match store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Confidence::No,
        };
        if total_blocks < 2 {
            return Confidence::No;
        }

        let mut block = [0u8; 512];
        if store.read_block(2, &mut block).is_err() {
            return Confidence::No;
        }
        let mut mdb_bytes = [0u8; MDB_LEN];
        mdb_bytes.copy_from_slice(&block[..MDB_LEN]);
        let mdb = MdbInfo::from_bytes(&mdb_bytes);

        match mdb.signature {
            HFS_SIGNATURE => score_hfs(&mdb, total_blocks),
            MFS_SIGNATURE => Confidence::Maybe,
            _ => Confidence::No,
        }
    }
}

/// `mdb.signature` already matched `HFS_SIGNATURE`; this narrows `Yes` down
/// to `Good`/`Maybe` when the allocation geometry it describes doesn't fit
/// inside the store, which happens for truncated images or false positives
/// on raw data that happens to carry `0x4244` at the right offset.
fn score_hfs(mdb: &MdbInfo, total_blocks: u64) -> Confidence {
    if mdb.alloc_block_count == 0 || mdb.alloc_block_size < 512 || mdb.alloc_block_size % 512 != 0
    {
        return Confidence::Barely;
    }
    let blocks_per_alloc = (mdb.alloc_block_size / 512) as u64;
    let last_alloc_block = mdb.alloc_block_start as u64
        + mdb.alloc_block_count as u64 * blocks_per_alloc;
    if last_alloc_block > total_blocks {
        return Confidence::Barely;
    }
    if mdb.free_blocks > mdb.alloc_block_count {
        return Confidence::Good;
    }
    Confidence::Yes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::mdb::VolumeAttrs;
    use crate::structures::extent::ExtDataRec;
    use chrono::{TimeZone, Utc};
    use paleofs_io::{MemStore, SectorOrdering};

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
            default_clump_size: 1024 * 4,
            alloc_block_start: 6,
            next_cnid: 16,
            free_blocks: 90,
            volume_name: b"Untitled".to_vec(),
            backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
            backup_seq_num: 0,
            write_count: 0,
            extents_clump_size: 1024 * 4,
            catalog_clump_size: 1024 * 4,
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

    fn store_with_mdb(mdb: &MdbInfo, total_blocks: u64) -> MemStore {
        let mut store = MemStore::new(
            vec![0u8; (total_blocks * 512) as usize],
            Geometry::Blocked {
                block_count: total_blocks,
            },
            SectorOrdering::Physical,
        );
        let mut block = [0u8; 512];
        block[..MDB_LEN].copy_from_slice(&mdb.to_bytes());
        store.write_block(2, &block).unwrap();
        store
    }

    #[test]
    fn recognizes_well_formed_mdb() {
        let mdb = sample_mdb();
        let store = store_with_mdb(&mdb, 800);
        assert_eq!(HfsProbe::test(&store), Confidence::Yes);
    }

    #[test]
    fn scores_mfs_signature_as_maybe() {
        let mut mdb = sample_mdb();
        mdb.signature = MFS_SIGNATURE;
        let store = store_with_mdb(&mdb, 800);
        assert_eq!(HfsProbe::test(&store), Confidence::Maybe);
    }

    #[test]
    fn rejects_geometry_that_cannot_hold_described_extent() {
        let mdb = sample_mdb();
        let store = store_with_mdb(&mdb, 50);
        assert_eq!(HfsProbe::test(&store), Confidence::Barely);
    }

    #[test]
    fn rejects_sectored_geometry() {
        let store = MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        );
        assert_eq!(HfsProbe::test(&store), Confidence::No);
    }
}
