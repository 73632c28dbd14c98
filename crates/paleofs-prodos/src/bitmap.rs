//! Free-block bitmap (`spec.md` §4.9: "1 bit per block, `1 = free`"), the
//! opposite polarity from HFS's volume bitmap. Serializes to/from
//! [`paleofs_common::AllocMap`], same as `paleofs-hfs::bitmap`.

use paleofs_common::{AllocMap, Owner};
use paleofs_core::Error;
use paleofs_io::ChunkStore;

pub fn bitmap_blocks(total_blocks: u16) -> u32 {
    let bits = total_blocks as u32;
    ((bits + 4095) / 4096).max(1)
}

pub fn load(store: &dyn ChunkStore, bitmap_start: u16, total_blocks: u16) -> Result<AllocMap, Error> {
    let mut map = AllocMap::new(total_blocks as u64, 0);
    let blocks = bitmap_blocks(total_blocks);
    let mut bn = 0u32;
    'blocks: for b in 0..blocks {
        let mut block = [0u8; 512];
        store.read_block(bitmap_start as u64 + b as u64, &mut block)?;
        for byte in block {
            for bit in 0..8u32 {
                if bn as u16 >= total_blocks {
                    break 'blocks;
                }
                let free = byte & (0x80 >> bit) != 0;
                map.force_state(bn as u64, free, if free { None } else { Some(Owner::System) })
                    .expect("unit within bounds");
                bn += 1;
            }
        }
    }
    Ok(map)
}

pub fn store_bitmap(
    store: &mut dyn ChunkStore,
    bitmap_start: u16,
    total_blocks: u16,
    map: &AllocMap,
) -> Result<(), Error> {
    let blocks = bitmap_blocks(total_blocks);
    let mut bn = 0u32;
    for b in 0..blocks {
        let mut block = [0u8; 512];
        for byte in block.iter_mut() {
            for bit in 0..8u32 {
                if bn as u16 >= total_blocks {
                    break;
                }
                if map.is_free(bn as u64).expect("unit within bounds") {
                    *byte |= 0x80 >> bit;
                }
                bn += 1;
            }
        }
        store.write_block(bitmap_start as u64 + b as u64, &block)?;
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
    fn bitmap_round_trips_with_inverted_polarity() {
        let mut store = blank_store(10);
        let mut map = AllocMap::new(280, 0);
        map.alloc(Owner::System).unwrap();
        map.alloc(Owner::System).unwrap();

        store_bitmap(&mut store, 6, 280, &map).unwrap();
        let loaded = load(&store, 6, 280).unwrap();
        assert!(!loaded.is_free(0).unwrap());
        assert!(!loaded.is_free(1).unwrap());
        assert!(loaded.is_free(2).unwrap());
    }
}
