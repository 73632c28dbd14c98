//! Read-only Apple Pascal catalog support (`SPEC_FULL.md` §10: "a thin
//! reader alongside ProDOS, not a full `Engine`"). Apple Pascal's volume
//! directory is four fixed blocks (2-5) of 26-byte entries: one volume
//! header followed by up to 77 file entries, each describing a *contiguous*
//! block range rather than an indirection structure — the opposite
//! simplicity tradeoff from ProDOS's seedling/sapling/tree.
//!
//! This module only reads an existing volume (catalog enumeration plus
//! whole-file reads); it never writes one, matching `spec.md` §1's note
//! that Pascal is in scope only "as a thin variant of the same abstract
//! model" for `EmbeddedDetector`'s hybrid-disk scenario.

use paleofs_core::error::{Error, Result};
use paleofs_io::{ChunkStore, Geometry};

pub const PASCAL_ENTRY_LEN: usize = 26;
pub const PASCAL_DIR_START_BLOCK: u16 = 2;
pub const PASCAL_MAX_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PascalVolumeHeader {
    /// First block past the volume directory (where ordinary files start).
    pub dir_end_block: u16,
    pub raw_name: Vec<u8>,
    pub total_blocks: u16,
    pub file_count: u16,
}

impl PascalVolumeHeader {
    pub fn to_bytes(&self) -> [u8; PASCAL_ENTRY_LEN] {
        let mut out = [0u8; PASCAL_ENTRY_LEN];
        out[0..2].copy_from_slice(&0u16.to_le_bytes());
        out[2..4].copy_from_slice(&self.dir_end_block.to_le_bytes());
        out[4] = 0; // file_kind 0 marks this entry as the volume header
        let name_len = self.raw_name.len().min(PASCAL_MAX_NAME_LEN) as u8;
        out[5] = name_len;
        out[6..6 + name_len as usize].copy_from_slice(&self.raw_name[..name_len as usize]);
        out[22..24].copy_from_slice(&self.total_blocks.to_le_bytes());
        out[24..26].copy_from_slice(&self.file_count.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; PASCAL_ENTRY_LEN]) -> Option<Self> {
        if u16::from_le_bytes(bytes[0..2].try_into().ok()?) != 0 || bytes[4] != 0 {
            return None;
        }
        let name_len = (bytes[5] as usize).min(PASCAL_MAX_NAME_LEN);
        Some(PascalVolumeHeader {
            dir_end_block: u16::from_le_bytes(bytes[2..4].try_into().ok()?),
            raw_name: bytes[6..6 + name_len].to_vec(),
            total_blocks: u16::from_le_bytes(bytes[22..24].try_into().ok()?),
            file_count: u16::from_le_bytes(bytes[24..26].try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PascalFileEntry {
    pub first_block: u16,
    pub next_block: u16,
    pub file_kind: u8,
    pub raw_name: Vec<u8>,
    /// Bytes used in the entry's last block; total length is
    /// `(next_block - first_block - 1) * 512 + last_byte_used`.
    pub last_byte_used: u16,
}

impl PascalFileEntry {
    pub fn name(&self) -> String {
        self.raw_name.iter().map(|&b| b as char).collect()
    }

    pub fn byte_len(&self) -> u64 {
        let full_blocks = (self.next_block.saturating_sub(self.first_block)).saturating_sub(1) as u64;
        full_blocks * 512 + self.last_byte_used as u64
    }

    pub fn to_bytes(&self) -> [u8; PASCAL_ENTRY_LEN] {
        let mut out = [0u8; PASCAL_ENTRY_LEN];
        out[0..2].copy_from_slice(&self.first_block.to_le_bytes());
        out[2..4].copy_from_slice(&self.next_block.to_le_bytes());
        out[4] = self.file_kind;
        let name_len = self.raw_name.len().min(PASCAL_MAX_NAME_LEN) as u8;
        out[5] = name_len;
        out[6..6 + name_len as usize].copy_from_slice(&self.raw_name[..name_len as usize]);
        out[24..26].copy_from_slice(&self.last_byte_used.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; PASCAL_ENTRY_LEN]) -> Option<Self> {
        let file_kind = bytes[4];
        if file_kind == 0 {
            return None; // the volume header, not a file
        }
        let name_len = (bytes[5] as usize).min(PASCAL_MAX_NAME_LEN);
        Some(PascalFileEntry {
            first_block: u16::from_le_bytes(bytes[0..2].try_into().ok()?),
            next_block: u16::from_le_bytes(bytes[2..4].try_into().ok()?),
            file_kind,
            raw_name: bytes[6..6 + name_len].to_vec(),
            last_byte_used: u16::from_le_bytes(bytes[24..26].try_into().ok()?),
        })
    }
}

/// The decoded volume directory plus its entries, read once at open time.
pub struct PascalCatalog {
    pub header: PascalVolumeHeader,
    pub files: Vec<PascalFileEntry>,
}

impl PascalCatalog {
    pub fn open(store: &dyn ChunkStore) -> Result<Self> {
        let mut first = [0u8; 512];
        store.read_block(PASCAL_DIR_START_BLOCK as u64, &mut first)?;
        let raw: [u8; PASCAL_ENTRY_LEN] = first[..PASCAL_ENTRY_LEN].try_into().expect("block >= entry len");
        let header = PascalVolumeHeader::from_bytes(&raw).ok_or(Error::InvalidImage)?;
        if header.dir_end_block <= PASCAL_DIR_START_BLOCK || header.dir_end_block > PASCAL_DIR_START_BLOCK + 8 {
            return Err(Error::InvalidImage);
        }

        let dir_bytes = (header.dir_end_block - PASCAL_DIR_START_BLOCK) as u64 * 512;
        let mut dir = vec![0u8; dir_bytes as usize];
        for (i, chunk) in dir.chunks_mut(512).enumerate() {
            store.read_block(PASCAL_DIR_START_BLOCK as u64 + i as u64, chunk)?;
        }

        let mut files = Vec::new();
        for i in 1..header.file_count as usize + 1 {
            let start = i * PASCAL_ENTRY_LEN;
            let Some(slice) = dir.get(start..start + PASCAL_ENTRY_LEN) else { break };
            let raw: [u8; PASCAL_ENTRY_LEN] = slice.try_into().expect("checked length");
            if let Some(f) = PascalFileEntry::from_bytes(&raw) {
                files.push(f);
            }
        }
        Ok(Self { header, files })
    }

    pub fn find(&self, name: &str) -> Option<&PascalFileEntry> {
        self.files.iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Whole-file read; Pascal files are always contiguous so no
    /// indirection is needed, unlike ProDOS's sapling/tree forks.
    pub fn read_file(&self, store: &dyn ChunkStore, entry: &PascalFileEntry, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = entry.byte_len();
        let available = len.saturating_sub(offset);
        let want = (buf.len() as u64).min(available) as usize;
        let mut done = 0usize;
        while done < want {
            let byte_offset = offset + done as u64;
            let block = entry.first_block as u64 + byte_offset / 512;
            let in_block = (byte_offset % 512) as usize;
            let n = (512 - in_block).min(want - done);
            let mut tmp = [0u8; 512];
            store.read_block(block, &mut tmp)?;
            buf[done..done + n].copy_from_slice(&tmp[in_block..in_block + n]);
            done += n;
        }
        Ok(want)
    }
}

pub struct PascalProbe;

impl paleofs_core::probe::Probe for PascalProbe {
    const FORMAT: paleofs_core::probe::FormatId = paleofs_core::probe::FormatId::Pascal;

    fn test(store: &dyn ChunkStore) -> paleofs_core::probe::Confidence {
        use paleofs_core::probe::Confidence;
        let total_blocks = match store.geometry() {
            Geometry::Blocked { block_count } => block_count,
            Geometry::Sectored { .. } => return Confidence::No,
        };
        if total_blocks < 6 {
            return Confidence::No;
        }
        let Ok(catalog) = PascalCatalog::open(store) else {
            return Confidence::No;
        };
        if catalog.header.raw_name.is_empty() || catalog.header.raw_name.len() > 7 {
            return Confidence::Barely;
        }
        if catalog.header.total_blocks as u64 > total_blocks {
            return Confidence::Barely;
        }
        if catalog.files.len() != catalog.header.file_count as usize {
            return Confidence::Good;
        }
        Confidence::Yes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_io::{MemStore, SectorOrdering};

    fn place_entry(dir: &mut [u8], slot: usize, bytes: &[u8; PASCAL_ENTRY_LEN]) {
        let start = slot * PASCAL_ENTRY_LEN;
        dir[start..start + PASCAL_ENTRY_LEN].copy_from_slice(bytes);
    }

    fn sample_image() -> MemStore {
        let total_blocks = 280u16;
        let mut data = vec![0u8; total_blocks as usize * 512];
        let header = PascalVolumeHeader {
            dir_end_block: 6,
            raw_name: b"MYDISK".to_vec(),
            total_blocks,
            file_count: 1,
        };
        let file = PascalFileEntry {
            first_block: 6,
            next_block: 8,
            file_kind: 3, // codefile
            raw_name: b"HELLO.CODE".to_vec(),
            last_byte_used: 100,
        };
        let mut dir = vec![0u8; 4 * 512];
        place_entry(&mut dir, 0, &header.to_bytes());
        place_entry(&mut dir, 1, &file.to_bytes());
        data[2 * 512..2 * 512 + dir.len()].copy_from_slice(&dir);
        data[7 * 512..7 * 512 + 50].copy_from_slice(&[0xAB; 50]);
        MemStore::new(data, Geometry::Blocked { block_count: total_blocks as u64 }, SectorOrdering::Physical)
    }

    #[test]
    fn opens_catalog_and_lists_one_file() {
        let store = sample_image();
        let catalog = PascalCatalog::open(&store).unwrap();
        assert_eq!(catalog.header.raw_name, b"MYDISK");
        assert_eq!(catalog.files.len(), 1);
        assert_eq!(catalog.files[0].name(), "HELLO.CODE");
        assert_eq!(catalog.files[0].byte_len(), 612);
    }

    #[test]
    fn reads_file_contents() {
        let store = sample_image();
        let catalog = PascalCatalog::open(&store).unwrap();
        let entry = catalog.find("HELLO.CODE").unwrap();
        let mut buf = [0u8; 50];
        let n = catalog.read_file(&store, entry, 512, &mut buf).unwrap();
        assert_eq!(n, 50);
        assert_eq!(buf, [0xABu8; 50]);
    }

    #[test]
    fn probe_recognizes_well_formed_volume() {
        let store = sample_image();
        assert_eq!(
            <PascalProbe as paleofs_core::probe::Probe>::test(&store),
            paleofs_core::probe::Confidence::Yes
        );
    }

    #[test]
    fn probe_rejects_non_pascal_image() {
        let store = MemStore::new(vec![0xFFu8; 280 * 512], Geometry::Blocked { block_count: 280 }, SectorOrdering::Physical);
        assert_eq!(
            <PascalProbe as paleofs_core::probe::Probe>::test(&store),
            paleofs_core::probe::Confidence::No
        );
    }
}
