//! `FsMount<E>`: the engine-agnostic state machine every concrete mount is
//! driven through (`spec.md` §4.5, §5, §9). All descriptor I/O goes through
//! a [`DescriptorId`] rather than a descriptor object with a back-reference
//! into the mount, per `spec.md` §9's non-owning back-reference note.

use paleofs_common::VolumeUsage;
use paleofs_io::AccessLevel;

use crate::engine::{CreateMode, Engine};
use crate::entry::DirEntry;
use crate::error::{Error, Result};
use crate::notes::Notes;
use crate::seek::SeekFrom;
use crate::tracker::{DescriptorId, OpenFileTracker, OpenMode, Part};

/// `spec.md` §4.5: `Closed -> RawOpen -> FileOpen`, with `RawOpen` usable
/// independently for raw block/sector access without parsing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMountState {
    Closed,
    RawOpen,
    FileOpen,
}

/// Owns one engine instance and everything generic across formats: the
/// mount state machine, the open-descriptor registry, and the usage scan
/// cached from the last [`FsMount::prepare_file_access`].
pub struct FsMount<E: Engine> {
    engine: E,
    state: VolumeMountState,
    tracker: OpenFileTracker<E::EntryRef>,
    usage: Option<VolumeUsage>,
}

impl<E: Engine> FsMount<E> {
    /// Attaches to a freshly-probed engine. The mount starts in `RawOpen`:
    /// raw access is available immediately, file-level access requires an
    /// explicit [`FsMount::prepare_file_access`] (`spec.md` §4.5).
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: VolumeMountState::RawOpen,
            tracker: OpenFileTracker::new(),
            usage: None,
        }
    }

    pub fn state(&self) -> VolumeMountState {
        self.state
    }

    pub fn notes(&self) -> &Notes {
        self.engine.notes()
    }

    /// Parses directory metadata and, if requested, scans storage usage to
    /// populate [`FsMount::usage_report`]. Transitions `RawOpen -> FileOpen`.
    pub fn prepare_file_access(&mut self, do_scan: bool) -> Result<()> {
        self.engine.set_access_level(AccessLevel::Open);
        if do_scan {
            self.usage = Some(self.engine.scan_usage()?);
        }
        self.state = VolumeMountState::FileOpen;
        Ok(())
    }

    /// Drops to raw-only access. Refuses while descriptors are open, since a
    /// raw write underneath an open file would corrupt it silently.
    pub fn prepare_raw_access(&mut self) -> Result<()> {
        if !self.tracker.is_empty() {
            return Err(Error::OpenConflict);
        }
        self.engine.set_access_level(if self.engine.is_read_only() {
            AccessLevel::ReadOnly
        } else {
            AccessLevel::Open
        });
        self.state = VolumeMountState::RawOpen;
        self.usage = None;
        Ok(())
    }

    fn require_file_access(&self) -> Result<()> {
        match self.state {
            VolumeMountState::FileOpen => Ok(()),
            _ => Err(Error::InvalidMode),
        }
    }

    pub fn usage_report(&self) -> Option<&VolumeUsage> {
        self.usage.as_ref()
    }

    pub fn root(&self) -> E::EntryRef {
        self.engine.root()
    }

    pub fn entry(&self, r: E::EntryRef) -> Result<DirEntry> {
        self.require_file_access()?;
        self.engine.entry(r)
    }

    pub fn children(&self, parent: E::EntryRef) -> Result<Vec<E::EntryRef>> {
        self.require_file_access()?;
        self.engine.children(parent)
    }

    /// Opens `r`'s `part` for `mode`, enforcing `spec.md` §4.7's status gate
    /// and §5's RW-exclusivity before handing the engine a chance to reject
    /// it (e.g. `NotSupported` for a fork a format doesn't have).
    pub fn open(&mut self, r: E::EntryRef, part: Part, mode: OpenMode) -> Result<DescriptorId> {
        self.require_file_access()?;
        if !self.engine.supports_part(part) {
            return Err(Error::NotSupported);
        }
        let entry = self.engine.entry(r)?;
        match mode {
            OpenMode::Rw if self.engine.is_read_only() => return Err(Error::ReadOnly),
            OpenMode::Rw if !entry.can_open_rw() => return Err(Error::Damaged),
            OpenMode::Ro if !entry.can_open_ro() => return Err(Error::Damaged),
            _ => {}
        }
        self.tracker.try_open(r, part, mode)
    }

    fn descriptor(&self, id: DescriptorId) -> Result<(E::EntryRef, Part, OpenMode, u64)> {
        let d = self.tracker.get(id).ok_or(Error::NotFound)?;
        Ok((d.entry, d.part, d.mode, d.cursor))
    }

    pub fn read(&mut self, id: DescriptorId, buf: &mut [u8]) -> Result<usize> {
        self.require_file_access()?;
        let (entry, part, mode, cursor) = self.descriptor(id)?;
        let n = self.engine.read_at(entry, part, mode, cursor, buf)?;
        if let Some(d) = self.tracker.get_mut(id) {
            d.cursor += n as u64;
        }
        Ok(n)
    }

    pub fn write(&mut self, id: DescriptorId, buf: &[u8]) -> Result<usize> {
        self.require_file_access()?;
        let (entry, part, mode, cursor) = self.descriptor(id)?;
        if mode != OpenMode::Rw {
            return Err(Error::InvalidMode);
        }
        let n = self.engine.write_at(entry, part, cursor, buf)?;
        if let Some(d) = self.tracker.get_mut(id) {
            d.cursor += n as u64;
        }
        Ok(n)
    }

    pub fn seek(&mut self, id: DescriptorId, from: SeekFrom) -> Result<u64> {
        self.require_file_access()?;
        let (entry, part, mode, cursor) = self.descriptor(id)?;
        let len = self.engine.len_of(entry, part, mode)?;
        let target = match from {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => offset_by(cursor, delta)?,
            SeekFrom::End(delta) => offset_by(len, delta)?,
            SeekFrom::NextData => self
                .engine
                .next_data_or_hole(entry, part, cursor, false)?
                .unwrap_or(len),
            SeekFrom::NextHole => self
                .engine
                .next_data_or_hole(entry, part, cursor, true)?
                .unwrap_or(len),
        };
        if let Some(d) = self.tracker.get_mut(id) {
            d.cursor = target;
        }
        Ok(target)
    }

    pub fn set_len(&mut self, id: DescriptorId, new_len: u64) -> Result<()> {
        self.require_file_access()?;
        let (entry, part, mode, _) = self.descriptor(id)?;
        if mode != OpenMode::Rw {
            return Err(Error::InvalidMode);
        }
        self.engine.set_len(entry, part, new_len)
    }

    pub fn close(&mut self, id: DescriptorId) -> Result<()> {
        let d = self.tracker.close(id).ok_or(Error::NotFound)?;
        self.engine.flush_descriptor(d.entry, d.part)
    }

    pub fn create(&mut self, parent: E::EntryRef, name: &str, mode: CreateMode) -> Result<E::EntryRef> {
        self.require_file_access()?;
        if self.engine.is_read_only() {
            return Err(Error::ReadOnly);
        }
        self.engine.create(parent, name, mode)
    }

    pub fn delete(&mut self, r: E::EntryRef) -> Result<()> {
        self.require_file_access()?;
        if self.engine.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if self.tracker.has_open_for_entry(r) {
            return Err(Error::OpenConflict);
        }
        self.engine.delete(r)
    }

    pub fn move_entry(&mut self, r: E::EntryRef, new_parent: E::EntryRef, new_name: &str) -> Result<()> {
        self.require_file_access()?;
        if self.engine.is_read_only() {
            return Err(Error::ReadOnly);
        }
        self.engine.move_entry(r, new_parent, new_name)
    }

    pub fn add_rsrc_fork(&mut self, r: E::EntryRef) -> Result<()> {
        self.require_file_access()?;
        if self.engine.is_read_only() {
            return Err(Error::ReadOnly);
        }
        self.engine.add_rsrc_fork(r)
    }

    pub fn format(&mut self, name: &str, num: u32, bootable: bool) -> Result<()> {
        if self.engine.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if !self.tracker.is_empty() {
            return Err(Error::OpenConflict);
        }
        self.engine.format(name, num, bootable)?;
        self.usage = None;
        Ok(())
    }

    pub fn close_all(&mut self) -> Result<()> {
        for d in self.tracker.close_all() {
            self.engine.flush_descriptor(d.entry, d.part)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.engine.flush()
    }

    /// Closes every open descriptor and flushes, in that order
    /// (`spec.md` §5: dispose must not leave a descriptor's writes unflushed).
    pub fn dispose(mut self) -> Result<E> {
        self.close_all()?;
        self.flush()?;
        Ok(self.engine)
    }
}

fn offset_by(base: u64, delta: i64) -> Result<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64).ok_or(Error::OutOfRange)
    } else {
        base.checked_sub(delta.unsigned_abs()).ok_or(Error::OutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Access, EntryStatus, Sizes, Timestamps, TypeInfo};

    /// A single-file in-memory engine, just enough to exercise `FsMount`'s
    /// state machine and descriptor bookkeeping independent of any real
    /// on-disk format.
    struct MockEngine {
        data: Vec<u8>,
        read_only: bool,
        status: EntryStatus,
        notes: Notes,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                read_only: false,
                status: EntryStatus::default(),
                notes: Notes::new(),
            }
        }
    }

    impl Engine for MockEngine {
        type EntryRef = u32;

        fn root(&self) -> u32 {
            0
        }

        fn entry(&self, r: u32) -> Result<DirEntry> {
            match r {
                0 => Ok(DirEntry {
                    name: "VOLUME".into(),
                    raw_name: b"VOLUME".to_vec(),
                    access: Access::empty(),
                    type_info: TypeInfo::VolumeDirectory,
                    sizes: Sizes::default(),
                    timestamps: Timestamps::default(),
                    status: EntryStatus::default(),
                }),
                1 => Ok(DirEntry {
                    name: "A".into(),
                    raw_name: b"A".to_vec(),
                    access: Access::empty(),
                    type_info: TypeInfo::Dos { file_type: 0 },
                    sizes: Sizes {
                        data_len: self.data.len() as u64,
                        rsrc_len: 0,
                        storage_len: self.data.len() as u64,
                    },
                    timestamps: Timestamps::default(),
                    status: self.status,
                }),
                _ => Err(Error::NotFound),
            }
        }

        fn children(&self, parent: u32) -> Result<Vec<u32>> {
            if parent == 0 {
                Ok(vec![1])
            } else {
                Ok(vec![])
            }
        }

        fn supports_part(&self, part: Part) -> bool {
            part == Part::DataFork
        }

        fn scan_usage(&mut self) -> Result<VolumeUsage> {
            Ok(VolumeUsage::default())
        }

        fn read_at(&mut self, r: u32, _part: Part, _mode: OpenMode, offset: u64, buf: &mut [u8]) -> Result<usize> {
            if r != 1 {
                return Err(Error::NotFound);
            }
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }

        fn write_at(&mut self, r: u32, _part: Part, offset: u64, buf: &[u8]) -> Result<usize> {
            if r != 1 {
                return Err(Error::NotFound);
            }
            let offset = offset as usize;
            if offset + buf.len() > self.data.len() {
                self.data.resize(offset + buf.len(), 0);
            }
            self.data[offset..offset + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn len_of(&self, r: u32, _part: Part, _mode: OpenMode) -> Result<u64> {
            if r != 1 {
                return Err(Error::NotFound);
            }
            Ok(self.data.len() as u64)
        }

        fn set_len(&mut self, r: u32, _part: Part, new_len: u64) -> Result<()> {
            if r != 1 {
                return Err(Error::NotFound);
            }
            self.data.resize(new_len as usize, 0);
            Ok(())
        }

        fn next_data_or_hole(&self, _r: u32, _part: Part, _from: u64, _want_hole: bool) -> Result<Option<u64>> {
            Ok(None)
        }

        fn flush_descriptor(&mut self, _r: u32, _part: Part) -> Result<()> {
            Ok(())
        }

        fn create(&mut self, _parent: u32, _name: &str, _mode: CreateMode) -> Result<u32> {
            Err(Error::NotSupported)
        }

        fn delete(&mut self, _r: u32) -> Result<()> {
            Err(Error::NotSupported)
        }

        fn move_entry(&mut self, _r: u32, _new_parent: u32, _new_name: &str) -> Result<()> {
            Err(Error::NotSupported)
        }

        fn add_rsrc_fork(&mut self, _r: u32) -> Result<()> {
            Err(Error::NotSupported)
        }

        fn format(&mut self, _name: &str, _num: u32, _bootable: bool) -> Result<()> {
            self.data.clear();
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_read_only(&self) -> bool {
            self.read_only
        }

        fn set_access_level(&mut self, _level: AccessLevel) {}

        fn notes(&self) -> &Notes {
            &self.notes
        }

        fn notes_mut(&mut self) -> &mut Notes {
            &mut self.notes
        }
    }

    #[test]
    fn raw_open_rejects_file_operations() {
        let mount = FsMount::new(MockEngine::new());
        assert_eq!(mount.state(), VolumeMountState::RawOpen);
        assert_eq!(mount.entry(0), Err(Error::InvalidMode));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mount = FsMount::new(MockEngine::new());
        mount.prepare_file_access(false).unwrap();
        let id = mount.open(1, Part::DataFork, OpenMode::Rw).unwrap();
        mount.write(id, b"hello").unwrap();
        mount.seek(id, SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 5];
        let n = mount.read(id, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        mount.close(id).unwrap();
    }

    #[test]
    fn second_writer_conflicts() {
        let mut mount = FsMount::new(MockEngine::new());
        mount.prepare_file_access(false).unwrap();
        let _id = mount.open(1, Part::DataFork, OpenMode::Rw).unwrap();
        assert_eq!(
            mount.open(1, Part::DataFork, OpenMode::Rw),
            Err(Error::OpenConflict)
        );
    }

    #[test]
    fn damaged_entry_blocks_any_open() {
        let mut engine = MockEngine::new();
        engine.status.damaged = true;
        let mut mount = FsMount::new(engine);
        mount.prepare_file_access(false).unwrap();
        assert_eq!(
            mount.open(1, Part::DataFork, OpenMode::Ro),
            Err(Error::Damaged)
        );
    }

    #[test]
    fn dubious_entry_allows_ro_but_not_rw() {
        let mut engine = MockEngine::new();
        engine.status.dubious = true;
        let mut mount = FsMount::new(engine);
        mount.prepare_file_access(false).unwrap();
        assert!(mount.open(1, Part::DataFork, OpenMode::Ro).is_ok());
        assert_eq!(
            mount.open(1, Part::DataFork, OpenMode::Rw),
            Err(Error::Damaged)
        );
    }

    #[test]
    fn prepare_raw_access_refuses_with_open_descriptors() {
        let mut mount = FsMount::new(MockEngine::new());
        mount.prepare_file_access(false).unwrap();
        let _id = mount.open(1, Part::DataFork, OpenMode::Ro).unwrap();
        assert_eq!(mount.prepare_raw_access(), Err(Error::OpenConflict));
    }

    #[test]
    fn unsupported_part_rejected() {
        let mut mount = FsMount::new(MockEngine::new());
        mount.prepare_file_access(false).unwrap();
        assert_eq!(
            mount.open(1, Part::RsrcFork, OpenMode::Ro),
            Err(Error::NotSupported)
        );
    }
}
