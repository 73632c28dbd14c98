//! ProDOS recognition (`spec.md` §4.4, §4.9): block 2's first directory
//! entry must decode as a well-formed volume header naming itself as such.

use paleofs_core::probe::{Confidence, FormatId, Probe};
use paleofs_io::{ChunkStore, Geometry};

use crate::structures::{VolumeHeader, ENTRIES_PER_BLOCK, ENTRY_LEN};

pub struct ProdosProbe;

impl Probe for ProdosProbe {
    const FORMAT: FormatId = FormatId::Prodos;

    fn test(store: &dyn ChunkStore) -> Confidence {
        let total_blocks = match store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Confidence::No,
        };
        if total_blocks < 16 || total_blocks > u16::MAX as u64 {
            return Confidence::No;
        }
        let mut block = [0u8; 512];
        if store.read_block(2, &mut block).is_err() {
            return Confidence::No;
        }
        let raw: [u8; ENTRY_LEN] = block[4..4 + ENTRY_LEN].try_into().expect("block >= 4+ENTRY_LEN");
        let Some(header) = VolumeHeader::from_bytes(&raw) else {
            return Confidence::No;
        };
        score(&header, total_blocks)
    }
}

fn score(header: &VolumeHeader, total_blocks: u64) -> Confidence {
    if header.entry_length as usize != ENTRY_LEN || header.entries_per_block as usize != ENTRIES_PER_BLOCK {
        return Confidence::Barely;
    }
    if header.raw_name.is_empty() || header.raw_name.len() > 15 {
        return Confidence::Barely;
    }
    if header.total_blocks as u64 > total_blocks {
        return Confidence::Barely;
    }
    if header.bit_map_pointer < 2 || header.bit_map_pointer as u64 >= total_blocks {
        return Confidence::Barely;
    }
    if header.total_blocks as u64 == total_blocks {
        Confidence::Yes
    } else {
        Confidence::Good
    }
}
