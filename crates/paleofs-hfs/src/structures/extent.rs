//! Extent descriptors (`spec.md` §4.8: "`ExtDescriptor` = `(start_abn,
//! num_abn)`; `ExtDataRec` = three descriptors") and the extents-overflow
//! B*-tree's key/record shapes.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Which fork an extent record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fork {
    Data,
    Rsrc,
}

impl Fork {
    pub const DATA_BYTE: u8 = 0x00;
    pub const RSRC_BYTE: u8 = 0xff;

    pub fn to_byte(self) -> u8 {
        match self {
            Fork::Data => Self::DATA_BYTE,
            Fork::Rsrc => Self::RSRC_BYTE,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            Self::DATA_BYTE => Some(Fork::Data),
            Self::RSRC_BYTE => Some(Fork::Rsrc),
            _ => None,
        }
    }
}

/// One run of contiguous allocation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtDescriptor {
    pub start_abn: u16,
    pub num_abn: u16,
}

impl ExtDescriptor {
    pub const EMPTY: ExtDescriptor = ExtDescriptor { start_abn: 0, num_abn: 0 };

    pub fn is_empty(&self) -> bool {
        self.num_abn == 0
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, KnownLayout, Immutable, IntoBytes, FromBytes)]
struct RawExtDescriptor {
    start_abn: [u8; 2],
    num_abn: [u8; 2],
}

/// Three extent descriptors — every catalog file record carries one of
/// these per fork; fragments beyond this live in the extents-overflow tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtDataRec(pub [ExtDescriptor; 3]);

impl ExtDataRec {
    pub const SIZE: usize = 12;
    pub const EMPTY: ExtDataRec = ExtDataRec([ExtDescriptor::EMPTY; 3]);

    pub fn total_blocks(&self) -> u32 {
        self.0.iter().map(|e| e.num_abn as u32).sum()
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let raw: [RawExtDescriptor; 3] =
            <[RawExtDescriptor; 3]>::read_from_bytes(bytes).expect("12-byte ExtDataRec");
        ExtDataRec(std::array::from_fn(|i| ExtDescriptor {
            start_abn: u16::from_be_bytes(raw[i].start_abn),
            num_abn: u16::from_be_bytes(raw[i].num_abn),
        }))
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let raw: [RawExtDescriptor; 3] = std::array::from_fn(|i| RawExtDescriptor {
            start_abn: self.0[i].start_abn.to_be_bytes(),
            num_abn: self.0[i].num_abn.to_be_bytes(),
        });
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

/// `(file_cnid, fork, first_ablk_index)`, the extents-overflow tree's 7-byte
/// key (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtentKey {
    pub file_cnid: u32,
    pub fork: Fork,
    pub first_ablk: u16,
}

impl ExtentKey {
    pub const LEN: usize = 7;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.file_cnid.to_be_bytes());
        out[4] = self.fork.to_byte();
        out[5..7].copy_from_slice(&self.first_ablk.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        Some(Self {
            file_cnid: u32::from_be_bytes(bytes[0..4].try_into().ok()?),
            fork: Fork::from_byte(bytes[4])?,
            first_ablk: u16::from_be_bytes(bytes[5..7].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_data_rec_round_trips() {
        let rec = ExtDataRec([
            ExtDescriptor { start_abn: 2, num_abn: 10 },
            ExtDescriptor::EMPTY,
            ExtDescriptor::EMPTY,
        ]);
        assert_eq!(ExtDataRec::from_bytes(&rec.to_bytes()), rec);
        assert_eq!(rec.total_blocks(), 10);
    }

    #[test]
    fn extent_key_round_trips_and_orders_by_cnid_then_fork_then_block() {
        let a = ExtentKey { file_cnid: 5, fork: Fork::Data, first_ablk: 0 };
        let b = ExtentKey { file_cnid: 5, fork: Fork::Rsrc, first_ablk: 0 };
        assert!(a < b);
        assert_eq!(ExtentKey::from_bytes(&a.to_bytes()), Some(a));
    }
}
