//! Format-agnostic scaffolding shared by every `paleofs-*` engine: the
//! uniform entry shape, the mount state machine, open-file concurrency
//! rules, and heuristic format probing (`spec.md` §4).

pub mod dirtree;
pub mod engine;
pub mod entry;
pub mod error;
pub mod mount;
pub mod notes;
pub mod probe;
pub mod seek;
pub mod tracker;

pub use engine::{CreateMode, Engine};
pub use entry::{Access, DirEntry, EntryStatus, Sizes, Timestamps, TypeInfo};
pub use error::{Error, Result};
pub use mount::{FsMount, VolumeMountState};
pub use notes::{Note, Notes, Severity};
pub use probe::{best_candidate, Candidate, Confidence, FormatId, Probe};
pub use seek::SeekFrom;
pub use tracker::{DescriptorId, OpenFileTracker, OpenMode, Part};
