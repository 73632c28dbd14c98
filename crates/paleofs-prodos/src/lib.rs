pub mod bitmap;
pub mod engine;
pub mod pascal;
pub mod probe;
pub mod storage;
pub mod structures;

pub use engine::{ProdosEngine, ProdosRef};
pub use pascal::{PascalCatalog, PascalFileEntry, PascalProbe, PascalVolumeHeader};
pub use probe::ProdosProbe;
