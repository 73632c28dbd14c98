//! PPM (Pascal ProFile Manager) partition maps (`spec.md` §4.10, third
//! bullet): a `PASCAL.AREA` file of ProDOS storage type 4 whose key pointer
//! addresses a two-block partition map directly, rather than a
//! seedling/sapling/tree data chain (`paleofs_prodos::storage` rejects that
//! storage type for the same reason `paleofs_prodos::pascal` reads Pascal
//! volumes on the side: it is a reserved marker, never one this crate's
//! engines allocate themselves).
//!
//! No reference PPM image survives in the corpus this was grounded on, so
//! the on-disk layout below is this crate's own best-guess encoding rather
//! than a verified one (see `DESIGN.md`): a 4-byte signature, a partition
//! count, then up to 31 fixed-size entries of a block range plus a
//! descriptive name.

use paleofs_core::error::Result;
use paleofs_core::probe::{Confidence, FormatId, Probe};
use paleofs_io::{ChunkStore, Geometry};
use paleofs_prodos::structures::{FileEntryInfo, StorageType, ENTRY_LEN};
use paleofs_prodos::ProdosProbe;
use paleofs_io::SectorOrdering;

use crate::EmbeddedPartition;

const ROOT_BLOCK: u64 = 2;
const ENTRIES_PER_BLOCK: usize = 13;
const MAX_PARTITIONS: usize = 31;
const ENTRY_LEN_PPM: usize = 24;
const NAME_LEN: usize = 16;
const SIGNATURE: [u8; 4] = *b"PPM1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PpmPartitionInfo {
    start_block: u32,
    block_count: u32,
}

impl PpmPartitionInfo {
    fn from_bytes(bytes: &[u8; ENTRY_LEN_PPM]) -> Self {
        PpmPartitionInfo {
            start_block: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            block_count: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

/// Decodes the two-block partition map `PASCAL.AREA`'s key pointer addresses
/// directly, rejecting a malformed signature or an out-of-range count.
fn decode_ppm(blocks: &[u8; 1024]) -> Option<Vec<PpmPartitionInfo>> {
    if blocks[0..4] != SIGNATURE {
        return None;
    }
    let count = blocks[4] as usize;
    if count == 0 || count > MAX_PARTITIONS {
        return None;
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = 5 + i * ENTRY_LEN_PPM;
        let raw: [u8; ENTRY_LEN_PPM] = blocks[start..start + ENTRY_LEN_PPM].try_into().ok()?;
        out.push(PpmPartitionInfo::from_bytes(&raw));
    }
    Some(out)
}

fn next_link(block: &[u8; 512]) -> u16 {
    u16::from_le_bytes([block[2], block[3]])
}

fn extract_entry(block: &[u8; 512], slot: usize) -> [u8; ENTRY_LEN] {
    let start = 4 + slot * ENTRY_LEN;
    block[start..start + ENTRY_LEN].try_into().expect("slot within block bounds")
}

/// Walks the volume directory's own block chain (not a subdirectory) looking
/// for the first `PascalArea`-typed entry, the same minimal byte-level
/// reading `paleofs_prodos::pascal` uses rather than mounting a full engine.
fn find_pascal_area(store: &dyn ChunkStore) -> Result<Option<FileEntryInfo>> {
    let mut block_num = ROOT_BLOCK as u16;
    let mut first = true;
    loop {
        let mut raw_block = [0u8; 512];
        store.read_block(block_num as u64, &mut raw_block)?;
        let start_slot = if first { 1 } else { 0 };
        for slot in start_slot..ENTRIES_PER_BLOCK {
            let raw = extract_entry(&raw_block, slot);
            if raw[0] >> 4 != StorageType::PascalArea.to_nibble() {
                continue;
            }
            if let Some(f) = FileEntryInfo::from_bytes(&raw) {
                return Ok(Some(f));
            }
        }
        let next = next_link(&raw_block);
        if next == 0 {
            break;
        }
        block_num = next;
        first = false;
    }
    Ok(None)
}

pub fn find_ppm<S: ChunkStore>(store: &mut S) -> Result<Vec<EmbeddedPartition>> {
    let total_blocks = match store.geometry() {
        Geometry::Blocked { block_count } => block_count,
        Geometry::Sectored { .. } => return Ok(Vec::new()),
    };
    if <ProdosProbe as Probe>::test(&*store) < Confidence::Maybe {
        return Ok(Vec::new());
    }

    let Some(area) = find_pascal_area(&*store)? else {
        return Ok(Vec::new());
    };

    let mut blocks = [0u8; 1024];
    let mut half = [0u8; 512];
    store.read_block(area.key_pointer as u64, &mut half)?;
    blocks[0..512].copy_from_slice(&half);
    store.read_block(area.key_pointer as u64 + 1, &mut half)?;
    blocks[512..1024].copy_from_slice(&half);

    let Some(partitions) = decode_ppm(&blocks) else {
        return Ok(Vec::new());
    };

    let mut accepted: Vec<(u64, u64)> = Vec::new();
    let mut out = Vec::new();
    for part in partitions {
        let start = part.start_block as u64;
        let count = part.block_count as u64;
        if count == 0 || start.saturating_add(count) > total_blocks {
            continue;
        }
        if accepted.iter().any(|&(s, c)| start < s + c && s < start + count) {
            continue;
        }
        accepted.push((start, count));
        out.push(EmbeddedPartition {
            format: FormatId::Prodos,
            start_block: start,
            block_count: count,
            ordering: SectorOrdering::ProDos,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_io::MemStore;
    use paleofs_prodos::ProdosEngine;

    fn place_entry(block: &mut [u8; 512], slot: usize, bytes: &[u8; ENTRY_LEN]) {
        let start = 4 + slot * ENTRY_LEN;
        block[start..start + ENTRY_LEN].copy_from_slice(bytes);
    }

    fn ppm_entry_bytes(start_block: u32, block_count: u32, name: &str) -> [u8; ENTRY_LEN_PPM] {
        let mut out = [0u8; ENTRY_LEN_PPM];
        out[0..4].copy_from_slice(&start_block.to_le_bytes());
        out[4..8].copy_from_slice(&block_count.to_le_bytes());
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN);
        out[8..8 + len].copy_from_slice(&bytes[..len]);
        out
    }

    /// A 1000-block ProDOS volume whose root directory holds a
    /// `PASCAL.AREA` file (storage type 4, key pointer 900) describing two
    /// non-overlapping partitions.
    fn ppm_image() -> MemStore {
        let total_blocks = 1000u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("PPMDISK", 0, false).unwrap();
        let mut store = engine.into_store();

        let area = FileEntryInfo {
            storage_type: StorageType::PascalArea,
            raw_name: b"PASCAL.AREA".to_vec(),
            file_type: 0,
            key_pointer: 900,
            blocks_used: 2,
            eof: 1024,
            created: None,
            modified: None,
            access: 0xC3,
            aux_type: 0,
            header_pointer: ROOT_BLOCK as u16,
        };
        let mut root_block = [0u8; 512];
        store.read_block(ROOT_BLOCK, &mut root_block).unwrap();
        place_entry(&mut root_block, 1, &area.to_bytes());
        store.write_block(ROOT_BLOCK, &root_block).unwrap();

        let mut map_block0 = [0u8; 512];
        map_block0[0..4].copy_from_slice(&SIGNATURE);
        map_block0[4] = 2;
        let e0 = ppm_entry_bytes(10, 280, "DOS1");
        let e1 = ppm_entry_bytes(300, 280, "DOS2");
        map_block0[5..5 + ENTRY_LEN_PPM].copy_from_slice(&e0);
        map_block0[5 + ENTRY_LEN_PPM..5 + 2 * ENTRY_LEN_PPM].copy_from_slice(&e1);
        store.write_block(900, &map_block0).unwrap();
        store.write_block(901, &[0u8; 512]).unwrap();

        store
    }

    #[test]
    fn finds_two_partitions_from_pascal_area_file() {
        let mut store = ppm_image();
        let found = find_ppm(&mut store).unwrap();
        assert_eq!(
            found,
            vec![
                EmbeddedPartition {
                    format: FormatId::Prodos,
                    start_block: 10,
                    block_count: 280,
                    ordering: SectorOrdering::ProDos,
                },
                EmbeddedPartition {
                    format: FormatId::Prodos,
                    start_block: 300,
                    block_count: 280,
                    ordering: SectorOrdering::ProDos,
                },
            ]
        );
    }

    #[test]
    fn finds_nothing_without_a_pascal_area_file() {
        let total_blocks = 280u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("WHOLE", 0, false).unwrap();
        let mut store = engine.into_store();
        assert_eq!(find_ppm(&mut store).unwrap(), Vec::new());
    }

    #[test]
    fn rejects_overlapping_partitions() {
        let total_blocks = 1000u64;
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; total_blocks as usize * 512],
            Geometry::Blocked { block_count: total_blocks },
            SectorOrdering::Physical,
        ));
        engine.format("PPMDISK", 0, false).unwrap();
        let mut store = engine.into_store();

        let area = FileEntryInfo {
            storage_type: StorageType::PascalArea,
            raw_name: b"PASCAL.AREA".to_vec(),
            file_type: 0,
            key_pointer: 900,
            blocks_used: 2,
            eof: 1024,
            created: None,
            modified: None,
            access: 0xC3,
            aux_type: 0,
            header_pointer: ROOT_BLOCK as u16,
        };
        let mut root_block = [0u8; 512];
        store.read_block(ROOT_BLOCK, &mut root_block).unwrap();
        place_entry(&mut root_block, 1, &area.to_bytes());
        store.write_block(ROOT_BLOCK, &root_block).unwrap();

        let mut map_block0 = [0u8; 512];
        map_block0[0..4].copy_from_slice(&SIGNATURE);
        map_block0[4] = 2;
        let e0 = ppm_entry_bytes(10, 280, "DOS1");
        let e1 = ppm_entry_bytes(200, 280, "DOS2"); // overlaps [10, 290)
        map_block0[5..5 + ENTRY_LEN_PPM].copy_from_slice(&e0);
        map_block0[5 + ENTRY_LEN_PPM..5 + 2 * ENTRY_LEN_PPM].copy_from_slice(&e1);
        store.write_block(900, &map_block0).unwrap();
        store.write_block(901, &[0u8; 512]).unwrap();

        let found = find_ppm(&mut store).unwrap();
        assert_eq!(
            found,
            vec![EmbeddedPartition {
                format: FormatId::Prodos,
                start_block: 10,
                block_count: 280,
                ordering: SectorOrdering::ProDos,
            }]
        );
    }
}
