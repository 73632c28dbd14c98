pub mod catalog;
pub mod extent;
pub mod mdb;
pub mod node;

pub use catalog::{CatalogKey, CatalogRecord, DirRecord, FileFlags, FileRecord, ThreadRecord};
pub use extent::{ExtDataRec, ExtDescriptor, ExtentKey, Fork};
pub use mdb::{MdbInfo, VolumeAttrs, HFS_SIGNATURE, MDB_LEN, MFS_SIGNATURE};
pub use node::{Node, NodeKind, RawRecord, NODE_SIZE};
