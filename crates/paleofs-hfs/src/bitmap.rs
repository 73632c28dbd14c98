//! Volume allocation-block bitmap (`spec.md` §4.8: "one bit per allocation
//! block, starting at `drVBMSt`"). Serializes to/from
//! [`paleofs_common::AllocMap`], which already carries the lowest-free-unit
//! allocation policy and transactional undo this format wants.

use paleofs_common::{AllocMap, Owner};
use paleofs_io::ChunkStore;
use paleofs_core::Error;

/// Number of 512-byte blocks the on-disk bitmap occupies for `alloc_block_count`
/// allocation blocks, one bit each.
pub fn bitmap_blocks(alloc_block_count: u16) -> u32 {
    let bits = alloc_block_count as u32;
    ((bits + 4095) / 4096).max(1)
}

pub fn load(
    store: &dyn ChunkStore,
    bitmap_start: u64,
    alloc_block_count: u16,
) -> Result<AllocMap, Error> {
    let mut map = AllocMap::new(alloc_block_count as u64, 0);
    let blocks = bitmap_blocks(alloc_block_count);
    let mut abn = 0u32;
    'blocks: for b in 0..blocks {
        let mut block = [0u8; 512];
        store.read_block(bitmap_start + b as u64, &mut block)?;
        for byte in block {
            for bit in 0..8u32 {
                if abn as u16 >= alloc_block_count {
                    break 'blocks;
                }
                let free = byte & (0x80 >> bit) == 0;
                map.force_state(abn as u64, free, if free { None } else { Some(Owner::System) })
                    .expect("unit within bounds");
                abn += 1;
            }
        }
    }
    Ok(map)
}

pub fn store_bitmap(
    store: &mut dyn ChunkStore,
    bitmap_start: u64,
    alloc_block_count: u16,
    map: &AllocMap,
) -> Result<(), Error> {
    let blocks = bitmap_blocks(alloc_block_count);
    let mut abn = 0u32;
    for b in 0..blocks {
        let mut block = [0u8; 512];
        for byte in block.iter_mut() {
            for bit in 0..8u32 {
                if abn as u16 >= alloc_block_count {
                    break;
                }
                if !map.is_free(abn as u64).expect("unit within bounds") {
                    *byte |= 0x80 >> bit;
                }
                abn += 1;
            }
        }
        store.write_block(bitmap_start + b as u64, &block)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_io::{Geometry, MemStore, SectorOrdering};

    fn blank_store(blocks: u64) -> MemStore {
        MemStore::new(vec![0u8; (blocks * 512) as usize], Geometry::Blocked { block_count: blocks }, SectorOrdering::Physical)
    }

    #[test]
    fn bitmap_round_trips_through_store() {
        let mut store = blank_store(10);
        let mut map = AllocMap::new(40, 0);
        map.alloc(Owner::System).unwrap();
        map.alloc(Owner::System).unwrap();
        let third = map.alloc(Owner::System).unwrap();
        map.free(third);

        store_bitmap(&mut store, 3, 40, &map).unwrap();
        let loaded = load(&store, 3, 40).unwrap();
        assert!(!loaded.is_free(0).unwrap());
        assert!(!loaded.is_free(1).unwrap());
        assert!(loaded.is_free(2).unwrap());
        assert!(loaded.is_free(3).unwrap());
    }

    #[test]
    fn bitmap_blocks_rounds_up_to_next_block() {
        assert_eq!(bitmap_blocks(1), 1);
        assert_eq!(bitmap_blocks(4096), 1);
        assert_eq!(bitmap_blocks(4097), 2);
    }
}
