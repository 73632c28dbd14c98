//! Catalog tree key and record shapes (`spec.md` §4.8): `Directory` (70 B),
//! `File` (102 B), and `Thread` (46 B) records keyed by
//! `(parent_cnid, name)` with Mac-Roman collation.

use chrono::{DateTime, Utc};
use paleofs_common::charset::hfs_compare;
use std::cmp::Ordering;

use super::extent::ExtDataRec;

/// `(parent_cnid, name)`, compared with [`hfs_compare`] on `name` once
/// `parent_cnid` ties (`spec.md` §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogKey {
    pub parent_cnid: u32,
    pub name: Vec<u8>,
}

impl CatalogKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.name.len());
        out.extend_from_slice(&self.parent_cnid.to_be_bytes());
        out.push(self.name.len() as u8);
        out.extend_from_slice(&self.name);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 5 {
            return None;
        }
        let parent_cnid = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let name_len = bytes[4] as usize;
        let name = bytes.get(5..5 + name_len)?.to_vec();
        Some(CatalogKey { parent_cnid, name })
    }

    pub fn compare(&self, other: &CatalogKey) -> Ordering {
        self.parent_cnid.cmp(&other.parent_cnid).then_with(|| hfs_compare(&self.name, &other.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub cnid: u32,
    pub locked: bool,
    pub valence: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub backup: DateTime<Utc>,
    pub finder_info: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags {
    pub locked: bool,
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub cnid: u32,
    pub flags: FileFlags,
    /// 16-byte Finder info blob; the first four bytes are the file type
    /// and the next four the creator (`paleofs_core::entry::TypeInfo::Hfs`),
    /// the rest kept opaque like the MDB's `drFndrInfo`.
    pub finder_info: [u8; 16],
    pub fxinfo: [u8; 16],
    pub data_logical_len: u32,
    pub data_physical_len: u32,
    pub rsrc_logical_len: u32,
    pub rsrc_physical_len: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub backup: DateTime<Utc>,
    pub data_extents: ExtDataRec,
    pub rsrc_extents: ExtDataRec,
}

impl FileRecord {
    pub fn file_type(&self) -> [u8; 4] {
        self.finder_info[0..4].try_into().unwrap()
    }

    pub fn creator(&self) -> [u8; 4] {
        self.finder_info[4..8].try_into().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub parent_cnid: u32,
    pub name: Vec<u8>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Dir(DirRecord),
    File(FileRecord),
    Thread(ThreadRecord),
}

const REC_DIR: u8 = 1;
const REC_FILE: u8 = 2;
const REC_THREAD: u8 = 3;

fn dt_to_secs(dt: DateTime<Utc>) -> u32 {
    dt.timestamp().clamp(0, u32::MAX as i64) as u32
}

fn secs_to_dt(secs: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
}

impl CatalogRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            CatalogRecord::Dir(d) => {
                let mut out = Vec::with_capacity(70);
                out.push(REC_DIR);
                out.push(if d.locked { 0x01 } else { 0 });
                out.extend_from_slice(&d.cnid.to_be_bytes());
                out.extend_from_slice(&d.valence.to_be_bytes());
                out.extend_from_slice(&dt_to_secs(d.created).to_be_bytes());
                out.extend_from_slice(&dt_to_secs(d.modified).to_be_bytes());
                out.extend_from_slice(&dt_to_secs(d.backup).to_be_bytes());
                out.extend_from_slice(&d.finder_info);
                out.resize(70, 0);
                out
            }
            CatalogRecord::File(f) => {
                let mut out = Vec::with_capacity(90);
                out.push(REC_FILE);
                let mut flag_byte = 0u8;
                if f.flags.locked {
                    flag_byte |= 0x01;
                }
                if f.flags.used {
                    flag_byte |= 0x80;
                }
                out.push(flag_byte);
                out.extend_from_slice(&f.finder_info);
                out.extend_from_slice(&f.cnid.to_be_bytes());
                out.extend_from_slice(&f.data_logical_len.to_be_bytes());
                out.extend_from_slice(&f.data_physical_len.to_be_bytes());
                out.extend_from_slice(&f.rsrc_logical_len.to_be_bytes());
                out.extend_from_slice(&f.rsrc_physical_len.to_be_bytes());
                out.extend_from_slice(&dt_to_secs(f.created).to_be_bytes());
                out.extend_from_slice(&dt_to_secs(f.modified).to_be_bytes());
                out.extend_from_slice(&dt_to_secs(f.backup).to_be_bytes());
                out.extend_from_slice(&f.fxinfo);
                out.extend_from_slice(&f.data_extents.to_bytes());
                out.extend_from_slice(&f.rsrc_extents.to_bytes());
                out
            }
            CatalogRecord::Thread(t) => {
                let mut out = Vec::with_capacity(46);
                out.push(REC_THREAD);
                out.push(if t.is_dir { 1 } else { 0 });
                out.extend_from_slice(&t.parent_cnid.to_be_bytes());
                let name_len = t.name.len().min(31);
                out.push(name_len as u8);
                out.extend_from_slice(&t.name[..name_len]);
                out.resize(46, 0);
                out
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let kind = *bytes.first()?;
        match kind {
            REC_DIR => Some(CatalogRecord::Dir(DirRecord {
                locked: *bytes.get(1)? & 0x01 != 0,
                cnid: u32::from_be_bytes(bytes.get(2..6)?.try_into().ok()?),
                valence: u32::from_be_bytes(bytes.get(6..10)?.try_into().ok()?),
                created: secs_to_dt(u32::from_be_bytes(bytes.get(10..14)?.try_into().ok()?)),
                modified: secs_to_dt(u32::from_be_bytes(bytes.get(14..18)?.try_into().ok()?)),
                backup: secs_to_dt(u32::from_be_bytes(bytes.get(18..22)?.try_into().ok()?)),
                finder_info: bytes.get(22..54)?.try_into().ok()?,
            })),
            REC_FILE => {
                let flag_byte = *bytes.get(1)?;
                Some(CatalogRecord::File(FileRecord {
                    flags: FileFlags { locked: flag_byte & 0x01 != 0, used: flag_byte & 0x80 != 0 },
                    finder_info: bytes.get(2..18)?.try_into().ok()?,
                    cnid: u32::from_be_bytes(bytes.get(18..22)?.try_into().ok()?),
                    data_logical_len: u32::from_be_bytes(bytes.get(22..26)?.try_into().ok()?),
                    data_physical_len: u32::from_be_bytes(bytes.get(26..30)?.try_into().ok()?),
                    rsrc_logical_len: u32::from_be_bytes(bytes.get(30..34)?.try_into().ok()?),
                    rsrc_physical_len: u32::from_be_bytes(bytes.get(34..38)?.try_into().ok()?),
                    created: secs_to_dt(u32::from_be_bytes(bytes.get(38..42)?.try_into().ok()?)),
                    modified: secs_to_dt(u32::from_be_bytes(bytes.get(42..46)?.try_into().ok()?)),
                    backup: secs_to_dt(u32::from_be_bytes(bytes.get(46..50)?.try_into().ok()?)),
                    fxinfo: bytes.get(50..66)?.try_into().ok()?,
                    data_extents: ExtDataRec::from_bytes(bytes.get(66..78)?.try_into().ok()?),
                    rsrc_extents: ExtDataRec::from_bytes(bytes.get(78..90)?.try_into().ok()?),
                }))
            }
            REC_THREAD => {
                let is_dir = *bytes.get(1)? == 1;
                let parent_cnid = u32::from_be_bytes(bytes.get(2..6)?.try_into().ok()?);
                let name_len = *bytes.get(6)? as usize;
                let name = bytes.get(7..7 + name_len)?.to_vec();
                Some(CatalogRecord::Thread(ThreadRecord { parent_cnid, name, is_dir }))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_key_orders_by_parent_then_name() {
        let a = CatalogKey { parent_cnid: 2, name: b"Alpha".to_vec() };
        let b = CatalogKey { parent_cnid: 2, name: b"beta".to_vec() };
        let c = CatalogKey { parent_cnid: 3, name: b"AAA".to_vec() };
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(a.compare(&c), Ordering::Less);
    }

    #[test]
    fn dir_record_round_trips() {
        let d = DirRecord {
            cnid: 20,
            locked: true,
            valence: 3,
            created: secs_to_dt(100),
            modified: secs_to_dt(200),
            backup: secs_to_dt(0),
            finder_info: [1; 32],
        };
        let bytes = CatalogRecord::Dir(d.clone()).to_bytes();
        assert_eq!(bytes.len(), 70);
        assert_eq!(CatalogRecord::from_bytes(&bytes), Some(CatalogRecord::Dir(d)));
    }

    #[test]
    fn file_record_round_trips() {
        let mut finder_info = [0u8; 16];
        finder_info[0..4].copy_from_slice(b"TEXT");
        finder_info[4..8].copy_from_slice(b"ttxt");
        let f = FileRecord {
            cnid: 30,
            flags: FileFlags { locked: true, used: true },
            finder_info,
            fxinfo: [0; 16],
            data_logical_len: 512,
            data_physical_len: 1024,
            rsrc_logical_len: 0,
            rsrc_physical_len: 0,
            created: secs_to_dt(1),
            modified: secs_to_dt(2),
            backup: secs_to_dt(0),
            data_extents: ExtDataRec::EMPTY,
            rsrc_extents: ExtDataRec::EMPTY,
        };
        let bytes = CatalogRecord::File(f.clone()).to_bytes();
        assert_eq!(bytes.len(), 90);
        assert_eq!(CatalogRecord::from_bytes(&bytes), Some(CatalogRecord::File(f)));
        assert_eq!(&f.file_type(), b"TEXT");
    }

    #[test]
    fn thread_record_round_trips() {
        let t = ThreadRecord { parent_cnid: 2, name: b"Sub".to_vec(), is_dir: true };
        let bytes = CatalogRecord::Thread(t.clone()).to_bytes();
        assert_eq!(bytes.len(), 46);
        assert_eq!(CatalogRecord::from_bytes(&bytes), Some(CatalogRecord::Thread(t)));
    }
}
