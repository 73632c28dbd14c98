//! Hybrid and embedded volume discovery (`spec.md` §4.10 `EmbeddedDetector`).
//!
//! None of the three scenarios here are engines: each finds a byte range
//! within an existing [`ChunkStore`] and describes it as an
//! [`EmbeddedPartition`], which the caller mounts with whatever concrete
//! engine owns the nested format. Detection is read-only and never mutates
//! the store it is given.

pub mod dos_master;
pub mod hybrid;
pub mod ppm;

use paleofs_core::probe::FormatId;
use paleofs_io::{ChunkStore, SectorOrdering};

/// A volume found nested inside another volume's image, named by its block
/// range in the *parent* store's own block addressing (always 512-byte
/// blocks; `spec.md` §4.1 block addressing is ordering-independent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedPartition {
    pub format: FormatId,
    pub start_block: u64,
    pub block_count: u64,
    /// The ordering under which the nested format should be mounted
    /// (e.g. `SectorOrdering::ProDos` for a ProDOS/Pascal block view reusing
    /// a DOS image's raw bytes).
    pub ordering: SectorOrdering,
}

/// Runs every `EmbeddedDetector` scenario in turn, returning the first one
/// that finds anything. The three scenarios are mutually exclusive in
/// practice (a DOS+ProDOS hybrid is a 5.25" sectored image; DOS-MASTER and
/// PPM both require an outer ProDOS volume), so there is no need to merge
/// results across them.
pub fn find_embedded_volumes<S: ChunkStore>(
    store: &mut S,
) -> paleofs_core::error::Result<Vec<EmbeddedPartition>> {
    if let Some(partition) = hybrid::find_dos_hybrid(store)? {
        return Ok(vec![partition]);
    }
    let dos_master = dos_master::find_dos_master(store)?;
    if !dos_master.is_empty() {
        return Ok(dos_master);
    }
    ppm::find_ppm(store)
}
