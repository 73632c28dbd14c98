//! The abstraction point every concrete on-disk engine (`paleofs-dos`,
//! `paleofs-hfs`, `paleofs-prodos`) implements, and the only thing
//! [`crate::mount::FsMount`] knows about a specific format (`spec.md` §2:
//! "engine parses metadata → builds `DirTree`... `FsMount` uses `AllocMap` +
//! `VolumeUsage` under the mount's mode gate").

use std::hash::Hash;

use paleofs_common::VolumeUsage;
use paleofs_io::AccessLevel;

use crate::entry::DirEntry;
use crate::error::Result;
use crate::notes::Notes;
use crate::tracker::{OpenMode, Part};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    File,
    Directory,
}

/// A format-specific on-disk engine. `EntryRef` is the lightweight,
/// `Copy` handle an engine uses to name one of its own directory entries —
/// a catalog slot for DOS, a CNID for HFS, a key-block number for ProDOS —
/// resolved back to a full [`DirEntry`] on demand via [`Engine::entry`]
/// rather than cached, so entries never hold an owning back-reference into
/// the engine (`spec.md` §9: "back-references are non-owning lookups").
pub trait Engine {
    type EntryRef: Copy + Eq + Hash + std::fmt::Debug;

    /// The synthesized volume-directory root (`spec.md` §4.6).
    fn root(&self) -> Self::EntryRef;

    fn entry(&self, r: Self::EntryRef) -> Result<DirEntry>;

    /// Children in on-disk order, not lexicographic order, unless the
    /// format mandates sorting (`spec.md` §4.6).
    fn children(&self, parent: Self::EntryRef) -> Result<Vec<Self::EntryRef>>;

    fn supports_part(&self, part: Part) -> bool;

    /// Builds a complete [`VolumeUsage`] by walking every file's storage
    /// metadata plus the format's own system structures.
    fn scan_usage(&mut self) -> Result<VolumeUsage>;

    fn read_at(
        &mut self,
        r: Self::EntryRef,
        part: Part,
        mode: OpenMode,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize>;

    fn write_at(&mut self, r: Self::EntryRef, part: Part, offset: u64, buf: &[u8]) -> Result<usize>;

    fn len_of(&self, r: Self::EntryRef, part: Part, mode: OpenMode) -> Result<u64>;

    fn set_len(&mut self, r: Self::EntryRef, part: Part, new_len: u64) -> Result<()>;

    /// Sparse-aware seek helper backing `SeekFrom::{NextData,NextHole}`.
    /// Returns `None` when no such position exists before EOF.
    fn next_data_or_hole(
        &self,
        r: Self::EntryRef,
        part: Part,
        from: u64,
        want_hole: bool,
    ) -> Result<Option<u64>>;

    /// Best-effort flush of one descriptor's part-specific metadata (e.g.
    /// DOS's embedded length word) on close.
    fn flush_descriptor(&mut self, r: Self::EntryRef, part: Part) -> Result<()>;

    fn create(
        &mut self,
        parent: Self::EntryRef,
        name: &str,
        create_mode: CreateMode,
    ) -> Result<Self::EntryRef>;

    fn delete(&mut self, r: Self::EntryRef) -> Result<()>;

    fn move_entry(&mut self, r: Self::EntryRef, new_parent: Self::EntryRef, new_name: &str) -> Result<()>;

    fn add_rsrc_fork(&mut self, r: Self::EntryRef) -> Result<()>;

    fn format(&mut self, name: &str, num: u32, bootable: bool) -> Result<()>;

    /// Flushes all dirty engine-level structures (VTOC/MDB/bitmap/...).
    fn flush(&mut self) -> Result<()>;

    fn is_read_only(&self) -> bool;

    fn set_access_level(&mut self, level: AccessLevel);

    fn notes(&self) -> &Notes;
    fn notes_mut(&mut self) -> &mut Notes;
}
