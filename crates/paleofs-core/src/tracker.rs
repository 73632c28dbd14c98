//! Open-file concurrency enforcement (`spec.md` §4.5 `OpenFileTracker`, §5).

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{Error, Result};

pub type DescriptorId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    DataFork,
    RsrcFork,
    RawData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Ro,
    Rw,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenDescriptor<R> {
    pub entry: R,
    pub part: Part,
    pub mode: OpenMode,
    pub cursor: u64,
}

/// Tracks every live descriptor in a mount and enforces: at most one RW
/// descriptor per `(entry, part)`; any number of RO descriptors; a deletion
/// is a write against an unspecified part, so any open descriptor for the
/// entry blocks it (`spec.md` §5).
pub struct OpenFileTracker<R> {
    next_id: DescriptorId,
    open: HashMap<DescriptorId, OpenDescriptor<R>>,
}

impl<R: Copy + Eq + Hash> Default for OpenFileTracker<R> {
    fn default() -> Self {
        Self {
            next_id: 0,
            open: HashMap::new(),
        }
    }
}

impl<R: Copy + Eq + Hash> OpenFileTracker<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_open(&mut self, entry: R, part: Part, mode: OpenMode) -> Result<DescriptorId> {
        for existing in self.open.values() {
            if existing.entry == entry
                && existing.part == part
                && (mode == OpenMode::Rw || existing.mode == OpenMode::Rw)
            {
                return Err(Error::OpenConflict);
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(
            id,
            OpenDescriptor {
                entry,
                part,
                mode,
                cursor: 0,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: DescriptorId) -> Option<&OpenDescriptor<R>> {
        self.open.get(&id)
    }

    pub fn get_mut(&mut self, id: DescriptorId) -> Option<&mut OpenDescriptor<R>> {
        self.open.get_mut(&id)
    }

    pub fn close(&mut self, id: DescriptorId) -> Option<OpenDescriptor<R>> {
        self.open.remove(&id)
    }

    /// `spec.md` §5: "a deletion is modeled as a write on an unspecified
    /// part, so any open descriptor for that entry blocks deletion."
    pub fn has_open_for_entry(&self, entry: R) -> bool {
        self.open.values().any(|d| d.entry == entry)
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn close_all(&mut self) -> Vec<OpenDescriptor<R>> {
        self.open.drain().map(|(_, d)| d).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_allowed() {
        let mut t: OpenFileTracker<u32> = OpenFileTracker::new();
        t.try_open(1, Part::DataFork, OpenMode::Ro).unwrap();
        t.try_open(1, Part::DataFork, OpenMode::Ro).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn writer_excludes_others() {
        let mut t: OpenFileTracker<u32> = OpenFileTracker::new();
        t.try_open(1, Part::DataFork, OpenMode::Rw).unwrap();
        assert_eq!(
            t.try_open(1, Part::DataFork, OpenMode::Ro),
            Err(Error::OpenConflict)
        );
    }

    #[test]
    fn reader_blocks_writer() {
        let mut t: OpenFileTracker<u32> = OpenFileTracker::new();
        t.try_open(1, Part::DataFork, OpenMode::Ro).unwrap();
        assert_eq!(
            t.try_open(1, Part::DataFork, OpenMode::Rw),
            Err(Error::OpenConflict)
        );
    }

    #[test]
    fn distinct_parts_independent() {
        let mut t: OpenFileTracker<u32> = OpenFileTracker::new();
        t.try_open(1, Part::DataFork, OpenMode::Rw).unwrap();
        t.try_open(1, Part::RsrcFork, OpenMode::Rw).unwrap();
        assert_eq!(t.len(), 2);
    }
}
