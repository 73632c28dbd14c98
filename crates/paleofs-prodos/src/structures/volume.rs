//! Volume- and subdirectory-header entries: the first entry in a
//! directory's first block, carrying the directory's own metadata rather
//! than naming a child (`spec.md` §4.9).

use chrono::{DateTime, Utc};

use super::entry::{decode_date_time, encode_date_time, StorageType, ENTRY_LEN, MAX_NAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub raw_name: Vec<u8>,
    pub created: Option<DateTime<Utc>>,
    pub access: u8,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub bit_map_pointer: u16,
    pub total_blocks: u16,
}

impl VolumeHeader {
    pub fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        let name_len = self.raw_name.len().min(MAX_NAME_LEN) as u8;
        out[0] = (StorageType::VolumeHeader.to_nibble() << 4) | name_len;
        out[1..1 + name_len as usize].copy_from_slice(&self.raw_name[..name_len as usize]);
        let (c_date, c_time) = self.created.map(encode_date_time).unwrap_or((0, 0));
        out[24..26].copy_from_slice(&c_date.to_le_bytes());
        out[26..28].copy_from_slice(&c_time.to_le_bytes());
        out[28] = 0x05;
        out[29] = 0x00;
        out[30] = self.access;
        out[31] = self.entry_length;
        out[32] = self.entries_per_block;
        out[33..35].copy_from_slice(&self.file_count.to_le_bytes());
        out[35..37].copy_from_slice(&self.bit_map_pointer.to_le_bytes());
        out[37..39].copy_from_slice(&self.total_blocks.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; ENTRY_LEN]) -> Option<Self> {
        if StorageType::from_nibble(bytes[0] >> 4)? != StorageType::VolumeHeader {
            return None;
        }
        let name_len = (bytes[0] & 0x0F) as usize;
        Some(VolumeHeader {
            raw_name: bytes[1..1 + name_len].to_vec(),
            created: decode_date_time(
                u16::from_le_bytes(bytes[24..26].try_into().ok()?),
                u16::from_le_bytes(bytes[26..28].try_into().ok()?),
            ),
            access: bytes[30],
            entry_length: bytes[31],
            entries_per_block: bytes[32],
            file_count: u16::from_le_bytes(bytes[33..35].try_into().ok()?),
            bit_map_pointer: u16::from_le_bytes(bytes[35..37].try_into().ok()?),
            total_blocks: u16::from_le_bytes(bytes[37..39].try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdirHeader {
    pub raw_name: Vec<u8>,
    pub created: Option<DateTime<Utc>>,
    pub access: u8,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub parent_pointer: u16,
    pub parent_entry_number: u8,
    pub parent_entry_length: u8,
}

impl SubdirHeader {
    pub fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        let name_len = self.raw_name.len().min(MAX_NAME_LEN) as u8;
        out[0] = (StorageType::SubdirHeader.to_nibble() << 4) | name_len;
        out[1..1 + name_len as usize].copy_from_slice(&self.raw_name[..name_len as usize]);
        out[15] = 0x75; // dir-entry marker byte real ProDOS writes after the reserved span
        let (c_date, c_time) = self.created.map(encode_date_time).unwrap_or((0, 0));
        out[24..26].copy_from_slice(&c_date.to_le_bytes());
        out[26..28].copy_from_slice(&c_time.to_le_bytes());
        out[28] = 0x05;
        out[29] = 0x00;
        out[30] = self.access;
        out[31] = self.entry_length;
        out[32] = self.entries_per_block;
        out[33..35].copy_from_slice(&self.file_count.to_le_bytes());
        out[35..37].copy_from_slice(&self.parent_pointer.to_le_bytes());
        out[37] = self.parent_entry_number;
        out[38] = self.parent_entry_length;
        out
    }

    pub fn from_bytes(bytes: &[u8; ENTRY_LEN]) -> Option<Self> {
        if StorageType::from_nibble(bytes[0] >> 4)? != StorageType::SubdirHeader {
            return None;
        }
        let name_len = (bytes[0] & 0x0F) as usize;
        Some(SubdirHeader {
            raw_name: bytes[1..1 + name_len].to_vec(),
            created: decode_date_time(
                u16::from_le_bytes(bytes[24..26].try_into().ok()?),
                u16::from_le_bytes(bytes[26..28].try_into().ok()?),
            ),
            access: bytes[30],
            entry_length: bytes[31],
            entries_per_block: bytes[32],
            file_count: u16::from_le_bytes(bytes[33..35].try_into().ok()?),
            parent_pointer: u16::from_le_bytes(bytes[35..37].try_into().ok()?),
            parent_entry_number: bytes[37],
            parent_entry_length: bytes[38],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_header_round_trips() {
        let h = VolumeHeader {
            raw_name: b"MY.DISK".to_vec(),
            created: None,
            access: 0xC3,
            entry_length: ENTRY_LEN as u8,
            entries_per_block: super::super::entry::ENTRIES_PER_BLOCK as u8,
            file_count: 3,
            bit_map_pointer: 6,
            total_blocks: 280,
        };
        let bytes = h.to_bytes();
        assert_eq!(VolumeHeader::from_bytes(&bytes), Some(h));
    }

    #[test]
    fn subdir_header_round_trips() {
        let h = SubdirHeader {
            raw_name: b"SUB".to_vec(),
            created: None,
            access: 0xC3,
            entry_length: ENTRY_LEN as u8,
            entries_per_block: super::super::entry::ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            parent_pointer: 2,
            parent_entry_number: 1,
            parent_entry_length: ENTRY_LEN as u8,
        };
        let bytes = h.to_bytes();
        assert_eq!(SubdirHeader::from_bytes(&bytes), Some(h));
    }
}
