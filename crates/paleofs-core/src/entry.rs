//! The uniform directory-entry shape every engine maps its own on-disk
//! record into (`spec.md` §3 `DirEntry`).

use bitflags::bitflags;
use chrono::{DateTime, Utc};

bitflags! {
    /// Access bits. Not every format uses every bit; an engine that has no
    /// notion of e.g. `INVISIBLE` simply never sets it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u16 {
        const LOCKED    = 0b0000_0001;
        const INVISIBLE = 0b0000_0010;
        const SYSTEM    = 0b0000_0100;
        const BACKUP_OK = 0b0000_1000;
        const RENAME_OK = 0b0001_0000;
        const DESTROY_OK = 0b0010_0000;
    }
}

/// Format-specific type information, carried as a tagged variant per
/// `spec.md` §9 ("model as tagged sum types; do not lean on inheritance").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeInfo {
    /// DOS 3.x file type byte (locked flag lives in `Access::LOCKED`, not
    /// the high bit here — that bit is stripped on decode).
    Dos { file_type: u8 },
    /// HFS/MFS four-character type and creator codes.
    Hfs { file_type: [u8; 4], creator: [u8; 4] },
    /// ProDOS storage type nibble plus file type byte and 16-bit aux type.
    Prodos {
        storage_type: u8,
        file_type: u8,
        aux_type: u16,
    },
    /// The synthesized volume-directory root every engine produces
    /// (`spec.md` §4.6), even for flat filesystems like DOS.
    VolumeDirectory,
    /// A subdirectory, for tree-shaped formats (ProDOS, HFS).
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sizes {
    pub data_len: u64,
    pub rsrc_len: u64,
    pub storage_len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamps {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

/// `spec.md` §3: "A *dubious* entry has detected irregularities but may be
/// read; a *damaged* entry may not be modified."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStatus {
    pub valid: bool,
    pub dubious: bool,
    pub damaged: bool,
}

impl Default for EntryStatus {
    fn default() -> Self {
        Self {
            valid: true,
            dubious: false,
            damaged: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub raw_name: Vec<u8>,
    pub access: Access,
    pub type_info: TypeInfo,
    pub sizes: Sizes,
    pub timestamps: Timestamps,
    pub status: EntryStatus,
}

impl DirEntry {
    /// `spec.md` §3 invariant: `storage_len >= data_len + rsrc_len` rounded
    /// up to the alloc unit. `alloc_unit` is the format's allocation-unit
    /// size in bytes.
    pub fn check_storage_invariant(&self, alloc_unit: u64) -> bool {
        let needed = self.sizes.data_len + self.sizes.rsrc_len;
        let rounded = needed.div_ceil(alloc_unit) * alloc_unit;
        self.sizes.storage_len >= rounded
    }

    /// Dubious or damaged entries cannot transition to a read-write open
    /// (`spec.md` §4.7: "*dubious* or *damaged* files cannot transition to
    /// `Open(RW)`").
    pub fn can_open_rw(&self) -> bool {
        self.status.valid && !self.status.damaged && !self.status.dubious
    }

    /// A damaged entry may not be opened at all; a dubious one may still be
    /// read (`spec.md` §3).
    pub fn can_open_ro(&self) -> bool {
        self.status.valid && !self.status.damaged
    }
}
