//! The owner of an allocation unit or of file-bearing metadata.

/// Opaque identifier for an open or cataloged file, scoped to one mount.
/// Engines mint these however suits their on-disk identity (a DOS catalog
/// slot index, an HFS CNID, a ProDOS key-block number); `paleofs-common`
/// never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

impl FileId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Who owns an allocation unit: a specific file, the filesystem's own
/// metadata (VTOC, catalog, bitmap, boot blocks), or nobody yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    System,
    File(FileId),
}

impl Owner {
    pub fn is_system(&self) -> bool {
        matches!(self, Owner::System)
    }

    pub fn file_id(&self) -> Option<FileId> {
        match self {
            Owner::File(id) => Some(*id),
            Owner::System => None,
        }
    }
}
