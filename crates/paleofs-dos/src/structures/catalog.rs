//! Catalog sectors: the singly linked chain of 256-byte sectors, each
//! holding seven 35-byte directory entries (`spec.md` §4.7).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const ENTRIES_PER_SECTOR: usize = 7;
pub const ENTRY_LEN: usize = 35;
pub const MAX_CATALOG_SECTORS: usize = 31;

/// First byte of a slot's T/S-list pointer: `0x00` unused, `0xff` deleted.
pub const SLOT_UNUSED: u8 = 0x00;
pub const SLOT_DELETED: u8 = 0xff;

/// High bit of the DOS type byte marks the file locked.
pub const LOCKED_BIT: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy, KnownLayout, Immutable, IntoBytes, FromBytes)]
pub struct RawCatalogEntry {
    pub tsl_track: u8,
    pub tsl_sector: u8,
    pub file_type: u8,
    pub name: [u8; 30],
    pub sector_count: [u8; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy, KnownLayout, Immutable, IntoBytes, FromBytes)]
pub struct RawCatalogSector {
    unused0: u8,
    pub next_track: u8,
    pub next_sector: u8,
    unused1: [u8; 8],
    pub entries: [RawCatalogEntry; ENTRIES_PER_SECTOR],
}

/// DOS's file-type byte, locked flag stripped (`spec.md` §3 "high bit = locked").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosType(pub u8);

impl DosType {
    pub const TEXT: DosType = DosType(0x00);
    pub const INTEGER_BASIC: DosType = DosType(0x01);
    pub const APPLESOFT_BASIC: DosType = DosType(0x02);
    pub const BINARY: DosType = DosType(0x04);
    pub const SS: DosType = DosType(0x08);
    pub const RELOCATABLE: DosType = DosType(0x10);
    pub const AA: DosType = DosType(0x20);
    pub const BB: DosType = DosType(0x40);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSlot {
    Unused,
    Deleted { raw_name: [u8; 30] },
    Used {
        tsl_track: u8,
        tsl_sector: u8,
        locked: bool,
        dos_type: DosType,
        raw_name: [u8; 30],
        sector_count: u16,
    },
}

impl CatalogSlot {
    pub fn from_raw(raw: &RawCatalogEntry) -> Self {
        match raw.tsl_track {
            SLOT_UNUSED => CatalogSlot::Unused,
            SLOT_DELETED => CatalogSlot::Deleted { raw_name: raw.name },
            track => CatalogSlot::Used {
                tsl_track: track,
                tsl_sector: raw.tsl_sector,
                locked: raw.file_type & LOCKED_BIT != 0,
                dos_type: DosType(raw.file_type & !LOCKED_BIT),
                raw_name: raw.name,
                sector_count: u16::from_le_bytes(raw.sector_count),
            },
        }
    }

    pub fn to_raw(&self) -> RawCatalogEntry {
        match self {
            CatalogSlot::Unused => RawCatalogEntry {
                tsl_track: SLOT_UNUSED,
                tsl_sector: 0,
                file_type: 0,
                name: [0xa0; 30],
                sector_count: [0; 2],
            },
            CatalogSlot::Deleted { raw_name } => RawCatalogEntry {
                tsl_track: SLOT_DELETED,
                tsl_sector: 0,
                file_type: 0,
                name: *raw_name,
                sector_count: [0; 2],
            },
            CatalogSlot::Used {
                tsl_track,
                tsl_sector,
                locked,
                dos_type,
                raw_name,
                sector_count,
            } => RawCatalogEntry {
                tsl_track: *tsl_track,
                tsl_sector: *tsl_sector,
                file_type: dos_type.0 | if *locked { LOCKED_BIT } else { 0 },
                name: *raw_name,
                sector_count: sector_count.to_le_bytes(),
            },
        }
    }
}

/// Encodes a display name into DOS's space-padded, high-ASCII 30-byte field.
pub fn encode_name(name: &str) -> [u8; 30] {
    let mut out = [0xa0u8; 30];
    for (i, b) in name.bytes().take(30).enumerate() {
        out[i] = b | 0x80;
    }
    out
}

/// Decodes a high-ASCII padded name back to a trimmed display string.
pub fn decode_name(raw: &[u8; 30]) -> String {
    let stripped: Vec<u8> = raw.iter().map(|b| b & 0x7f).collect();
    String::from_utf8_lossy(&stripped).trim_end().to_string()
}

#[derive(Debug, Clone)]
pub struct CatalogSectorInfo {
    pub next_track: u8,
    pub next_sector: u8,
    pub slots: [CatalogSlot; ENTRIES_PER_SECTOR],
}

impl CatalogSectorInfo {
    pub fn empty() -> Self {
        Self {
            next_track: 0,
            next_sector: 0,
            slots: std::array::from_fn(|_| CatalogSlot::Unused),
        }
    }

    pub fn from_bytes(bytes: &[u8; 256]) -> Self {
        let raw = RawCatalogSector::read_from_bytes(bytes).expect("catalog sector is 256 bytes");
        Self {
            next_track: raw.next_track,
            next_sector: raw.next_sector,
            slots: std::array::from_fn(|i| CatalogSlot::from_raw(&raw.entries[i])),
        }
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        let raw = RawCatalogSector {
            unused0: 0,
            next_track: self.next_track,
            next_sector: self.next_sector,
            unused1: [0; 8],
            entries: std::array::from_fn(|i| self.slots[i].to_raw()),
        };
        let mut out = [0u8; 256];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        let raw = encode_name("HELLO");
        assert_eq!(decode_name(&raw), "HELLO");
    }

    #[test]
    fn locked_bit_strips_from_type() {
        let slot = CatalogSlot::Used {
            tsl_track: 3,
            tsl_sector: 4,
            locked: true,
            dos_type: DosType::BINARY,
            raw_name: encode_name("X"),
            sector_count: 2,
        };
        let raw = slot.to_raw();
        assert_eq!(raw.file_type, 0x04 | LOCKED_BIT);
        match CatalogSlot::from_raw(&raw) {
            CatalogSlot::Used { locked, dos_type, .. } => {
                assert!(locked);
                assert_eq!(dos_type, DosType::BINARY);
            }
            other => panic!("expected Used, got {other:?}"),
        }
    }

    #[test]
    fn sector_round_trips() {
        let mut sector = CatalogSectorInfo::empty();
        sector.next_track = 17;
        sector.next_sector = 5;
        sector.slots[0] = CatalogSlot::Used {
            tsl_track: 10,
            tsl_sector: 0,
            locked: false,
            dos_type: DosType::APPLESOFT_BASIC,
            raw_name: encode_name("PROGRAM"),
            sector_count: 3,
        };
        let bytes = sector.to_bytes();
        let back = CatalogSectorInfo::from_bytes(&bytes);
        assert_eq!(back.next_track, 17);
        assert_eq!(back.next_sector, 5);
        match &back.slots[0] {
            CatalogSlot::Used { sector_count, .. } => assert_eq!(*sector_count, 3),
            other => panic!("expected Used, got {other:?}"),
        }
    }
}
