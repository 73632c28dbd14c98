//! Unified entry point for mounting a vintage Apple disk image (`spec.md`
//! §6). This crate owns no format-specific logic itself: probing, engines,
//! and on-disk layouts live in `paleofs-dos`/`paleofs-prodos`/`paleofs-hfs`;
//! this crate runs every compiled-in probe over a [`ChunkStore`], picks the
//! best-scoring candidate (`spec.md` §4.4), and builds the matching
//! [`FsMount`].

#[cfg(feature = "dos")]
pub use paleofs_dos as dos;
#[cfg(feature = "embedded")]
pub use paleofs_embedded as embedded;
#[cfg(feature = "hfs")]
pub use paleofs_hfs as hfs;
#[cfg(feature = "prodos")]
pub use paleofs_prodos as prodos;
pub use paleofs_common as common;
pub use paleofs_core as core;
pub use paleofs_io as io;

mod options;

pub use options::MountOptions;

use paleofs_core::error::{Error, Result};
use paleofs_core::probe::{Candidate, Confidence, FormatId, Probe};
use paleofs_core::FsMount;
use paleofs_io::{ChunkStore, SectorOrdering};

#[cfg(feature = "dos")]
use paleofs_dos::{DosEngine, DosProbe};
#[cfg(feature = "hfs")]
use paleofs_hfs::{HfsEngine, HfsProbe};
#[cfg(feature = "prodos")]
use paleofs_prodos::{ProdosEngine, ProdosProbe};

/// The mounted volume, tagged by whichever engine actually recognized it.
///
/// `spec.md` §6's abstract `mount(store, options) -> Mount` is realized here
/// as an enum rather than a trait object: every `FsMount<E>`'s `EntryRef`
/// type is engine-specific (`spec.md` §4.6), so there is no single concrete
/// type to erase to without boxing every entry reference. Callers match on
/// the variant to get at the concrete engine's own API.
pub enum Mount<S: ChunkStore> {
    #[cfg(feature = "dos")]
    Dos(FsMount<DosEngine<S>>),
    #[cfg(feature = "prodos")]
    Prodos(FsMount<ProdosEngine<S>>),
    #[cfg(feature = "hfs")]
    Hfs(FsMount<HfsEngine<S>>),
}

/// Scores every compiled-in format against `store`, without constructing an
/// engine (`spec.md` §4.4: "the mount driver picks the best ordering/format
/// pair across candidates").
pub fn probe<S: ChunkStore>(store: &S) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    #[cfg(feature = "dos")]
    candidates.push(Candidate {
        format: FormatId::Dos,
        ordering: SectorOrdering::Dos,
        confidence: <DosProbe as Probe>::test(store),
    });
    #[cfg(feature = "prodos")]
    candidates.push(Candidate {
        format: FormatId::Prodos,
        ordering: SectorOrdering::ProDos,
        confidence: <ProdosProbe as Probe>::test(store),
    });
    #[cfg(feature = "hfs")]
    candidates.push(Candidate {
        format: FormatId::Hfs,
        ordering: SectorOrdering::Physical,
        confidence: <HfsProbe as Probe>::test(store),
    });
    candidates
}

/// Probes `store` and mounts it with whichever engine scored best, subject
/// to `options` (`spec.md` §6: `mount(store, options) -> Mount`). A fresh
/// image with no recognizable filesystem scores `Confidence::No` everywhere
/// and fails with [`Error::InvalidImage`].
pub fn mount<S: ChunkStore>(store: S, options: MountOptions) -> Result<Mount<S>> {
    let best = probe(&store)
        .into_iter()
        .filter(|c| options.allows(c.format))
        .filter(|c| c.confidence > Confidence::No)
        .max_by_key(|c| c.confidence)
        .ok_or(Error::InvalidImage)?;

    match best.format {
        #[cfg(feature = "dos")]
        FormatId::Dos => Ok(Mount::Dos(FsMount::new(DosEngine::mount(store)?))),
        #[cfg(feature = "prodos")]
        FormatId::Prodos => Ok(Mount::Prodos(FsMount::new(ProdosEngine::mount(store)?))),
        #[cfg(feature = "hfs")]
        FormatId::Hfs => Ok(Mount::Hfs(FsMount::new(HfsEngine::mount(store)?))),
        _ => Err(Error::NotSupported),
    }
}

/// Searches `store` for a nested volume the top-level probe above would
/// never see — a hybrid DOS/Pascal image, a DOS-MASTER run, or a PPM
/// partition map (`spec.md` §4.10). Exposed at the umbrella level since it
/// is the other half of "mount whatever is actually in this image" a caller
/// reaches for right after a plain [`mount`] comes back `InvalidImage` or
/// with a suspiciously small recognized volume.
#[cfg(feature = "embedded")]
pub fn find_embedded_volumes<S: ChunkStore>(
    store: &mut S,
) -> Result<Vec<paleofs_embedded::EmbeddedPartition>> {
    paleofs_embedded::find_embedded_volumes(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_core::engine::Engine;
    use paleofs_io::{Geometry, MemStore};

    #[test]
    fn mounts_a_freshly_formatted_dos_volume() {
        let mut engine = DosEngine::blank(MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        ));
        engine.format("GREETINGS", 254, false).unwrap();
        let store = engine.into_store();

        match mount(store, MountOptions::new()).unwrap() {
            Mount::Dos(_) => {}
            _ => panic!("expected a DOS mount"),
        }
    }

    #[test]
    fn mounts_a_freshly_formatted_prodos_volume() {
        let mut engine = ProdosEngine::blank(MemStore::new(
            vec![0u8; 280 * 512],
            Geometry::Blocked { block_count: 280 },
            SectorOrdering::Physical,
        ));
        engine.format("GREETINGS", 0, false).unwrap();
        let store = engine.into_store();

        match mount(store, MountOptions::new()).unwrap() {
            Mount::Prodos(_) => {}
            _ => panic!("expected a ProDOS mount"),
        }
    }

    #[test]
    fn restricting_to_a_format_that_does_not_match_is_invalid_image() {
        let mut engine = DosEngine::blank(MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        ));
        engine.format("GREETINGS", 254, false).unwrap();
        let store = engine.into_store();

        let result = mount(store, MountOptions::new().only([FormatId::Prodos]));
        assert_eq!(result.err(), Some(Error::InvalidImage));
    }

    #[test]
    fn an_unformatted_image_is_invalid() {
        let store = MemStore::new(
            vec![0u8; 280 * 512],
            Geometry::Blocked { block_count: 280 },
            SectorOrdering::Physical,
        );
        assert_eq!(mount(store, MountOptions::new()).err(), Some(Error::InvalidImage));
    }
}
