//! Directory-block shapes (`spec.md` §4.9): 39-byte fixed entries, 13 per
//! 512-byte block, first entry of a directory's first block always a header
//! (volume or subdirectory) rather than a file.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

pub const ENTRY_LEN: usize = 39;
pub const ENTRIES_PER_BLOCK: usize = 13;
pub const MAX_NAME_LEN: usize = 15;

/// `storage_type` nibble, the high 4 bits of each entry's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Deleted,
    Seedling,
    Sapling,
    Tree,
    /// Reserved for a `PASCAL.AREA` partition-map file (PPM, `spec.md`
    /// §4.10); `paleofs-prodos` never allocates this type itself, only
    /// recognizes it.
    PascalArea,
    /// Extended (forked) file: the key block holds two sub-key-blocks, one
    /// per fork, rather than data directly.
    Forked,
    /// How a subdirectory appears in its *parent's* entry list.
    SubdirEntry,
    /// The first entry of a subdirectory's own first block.
    SubdirHeader,
    /// The first entry of the volume directory's first block.
    VolumeHeader,
}

impl StorageType {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0x0 => Some(StorageType::Deleted),
            0x1 => Some(StorageType::Seedling),
            0x2 => Some(StorageType::Sapling),
            0x3 => Some(StorageType::Tree),
            0x4 => Some(StorageType::PascalArea),
            0x5 => Some(StorageType::Forked),
            0xD => Some(StorageType::SubdirEntry),
            0xE => Some(StorageType::SubdirHeader),
            0xF => Some(StorageType::VolumeHeader),
            _ => None,
        }
    }

    pub fn to_nibble(self) -> u8 {
        match self {
            StorageType::Deleted => 0x0,
            StorageType::Seedling => 0x1,
            StorageType::Sapling => 0x2,
            StorageType::Tree => 0x3,
            StorageType::PascalArea => 0x4,
            StorageType::Forked => 0x5,
            StorageType::SubdirEntry => 0xD,
            StorageType::SubdirHeader => 0xE,
            StorageType::VolumeHeader => 0xF,
        }
    }
}

/// Read enable/write enable/rename enable/destroy enable bits of the access
/// byte, in the values real ProDOS firmware checks.
pub const ACCESS_DESTROY: u8 = 0x80;
pub const ACCESS_RENAME: u8 = 0x40;
pub const ACCESS_BACKUP: u8 = 0x20;
pub const ACCESS_WRITE: u8 = 0x02;
pub const ACCESS_READ: u8 = 0x01;
pub const ACCESS_DEFAULT: u8 = ACCESS_DESTROY | ACCESS_RENAME | ACCESS_WRITE | ACCESS_READ;

pub(crate) fn decode_date_time(date: u16, time: u16) -> Option<DateTime<Utc>> {
    if date == 0 {
        return None;
    }
    let year = 1900 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 8) & 0x1F) as u32;
    let minute = (time & 0x3F) as u32;
    Utc.with_ymd_and_hms(year, month.max(1), day.max(1), hour, minute, 0).single()
}

pub(crate) fn encode_date_time(dt: DateTime<Utc>) -> (u16, u16) {
    let year = (dt.year() - 1900).clamp(0, 127) as u16;
    let date = (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 8) | dt.minute() as u16;
    (date, time)
}

/// A decoded file entry (any `storage_type` except the header kinds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntryInfo {
    pub storage_type: StorageType,
    pub raw_name: Vec<u8>,
    pub file_type: u8,
    pub key_pointer: u16,
    pub blocks_used: u16,
    pub eof: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub access: u8,
    pub aux_type: u16,
    /// Block of the directory that contains this entry's header, used to
    /// find the entry again without re-walking from the root.
    pub header_pointer: u16,
}

impl FileEntryInfo {
    pub fn name(&self) -> String {
        self.raw_name.iter().map(|&b| b as char).collect()
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        let name_len = self.raw_name.len().min(MAX_NAME_LEN) as u8;
        out[0] = (self.storage_type.to_nibble() << 4) | name_len;
        out[1..1 + name_len as usize].copy_from_slice(&self.raw_name[..name_len as usize]);
        out[16] = self.file_type;
        out[17..19].copy_from_slice(&self.key_pointer.to_le_bytes());
        out[19..21].copy_from_slice(&self.blocks_used.to_le_bytes());
        out[21..24].copy_from_slice(&self.eof.to_le_bytes()[..3]);
        let (c_date, c_time) = self.created.map(encode_date_time).unwrap_or((0, 0));
        out[24..26].copy_from_slice(&c_date.to_le_bytes());
        out[26..28].copy_from_slice(&c_time.to_le_bytes());
        out[28] = 0x05; // version / min_version: ProDOS 1.0-compatible
        out[29] = 0x00;
        out[30] = self.access;
        out[31..33].copy_from_slice(&self.aux_type.to_le_bytes());
        let (m_date, m_time) = self.modified.map(encode_date_time).unwrap_or((0, 0));
        out[33..35].copy_from_slice(&m_date.to_le_bytes());
        out[35..37].copy_from_slice(&m_time.to_le_bytes());
        out[37..39].copy_from_slice(&self.header_pointer.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; ENTRY_LEN]) -> Option<Self> {
        let storage_type = StorageType::from_nibble(bytes[0] >> 4)?;
        let name_len = (bytes[0] & 0x0F) as usize;
        let raw_name = bytes[1..1 + name_len].to_vec();
        let mut eof_bytes = [0u8; 4];
        eof_bytes[..3].copy_from_slice(&bytes[21..24]);
        Some(FileEntryInfo {
            storage_type,
            raw_name,
            file_type: bytes[16],
            key_pointer: u16::from_le_bytes(bytes[17..19].try_into().ok()?),
            blocks_used: u16::from_le_bytes(bytes[19..21].try_into().ok()?),
            eof: u32::from_le_bytes(eof_bytes),
            created: decode_date_time(
                u16::from_le_bytes(bytes[24..26].try_into().ok()?),
                u16::from_le_bytes(bytes[26..28].try_into().ok()?),
            ),
            access: bytes[30],
            aux_type: u16::from_le_bytes(bytes[31..33].try_into().ok()?),
            modified: decode_date_time(
                u16::from_le_bytes(bytes[33..35].try_into().ok()?),
                u16::from_le_bytes(bytes[35..37].try_into().ok()?),
            ),
            header_pointer: u16::from_le_bytes(bytes[37..39].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_entry_round_trips() {
        let e = FileEntryInfo {
            storage_type: StorageType::Seedling,
            raw_name: b"HELLO".to_vec(),
            file_type: 0x04,
            key_pointer: 10,
            blocks_used: 1,
            eof: 512,
            created: Utc.with_ymd_and_hms(1984, 1, 24, 9, 30, 0).single(),
            modified: None,
            access: ACCESS_DEFAULT,
            aux_type: 0,
            header_pointer: 2,
        };
        let bytes = e.to_bytes();
        let back = FileEntryInfo::from_bytes(&bytes).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn storage_type_nibble_round_trips() {
        for st in [
            StorageType::Deleted,
            StorageType::Seedling,
            StorageType::Sapling,
            StorageType::Tree,
            StorageType::PascalArea,
            StorageType::Forked,
            StorageType::SubdirEntry,
            StorageType::SubdirHeader,
            StorageType::VolumeHeader,
        ] {
            assert_eq!(StorageType::from_nibble(st.to_nibble()), Some(st));
        }
    }
}
