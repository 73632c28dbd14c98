//! Hierarchical File System engine (`spec.md` §4.8): Master Directory
//! Block, catalog and extents-overflow B*-trees, and the volume bitmap. Also
//! recognizes (but does not mount) its MFS predecessor at the probe level.

pub mod bitmap;
pub mod btree;
pub mod engine;
pub mod probe;
pub mod storage;
pub mod structures;

pub use engine::HfsEngine;
pub use probe::HfsProbe;
