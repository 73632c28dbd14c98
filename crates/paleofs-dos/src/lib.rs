//! Apple DOS 3.2/3.3 engine (`spec.md` §4.7): VTOC, catalog, and
//! track/sector lists over a 13- or 16-sector-per-track image.

pub mod engine;
pub mod geometry;
pub mod length;
pub mod probe;
pub mod storage;
pub mod structures;

pub use engine::{DosEngine, DosEntryRef};
pub use probe::DosProbe;
