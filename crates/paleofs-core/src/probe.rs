//! Heuristic format identification (`spec.md` §4.4).

use paleofs_io::{ChunkStore, SectorOrdering};

/// A probe's confidence that a store contains its format, ordered so that
/// `Yes > Good > Maybe > Barely > No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    No,
    Barely,
    Maybe,
    Good,
    Yes,
}

/// Which on-disk format a candidate represents. `spec.md` §1 names DOS 3.3
/// and HFS as the core's fully engineered formats; the rest are recognized
/// at the probe/dispatch level as thin variants (§4.6), so the identifier
/// set below covers everything the probe and `EmbeddedDetector` need to
/// name, even where the engine behind it is a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    Dos,
    Prodos,
    Hfs,
    Mfs,
    Pascal,
    Cpm,
    Gutenberg,
    Rdos,
}

/// A pure probe function: given a store, how confident is this format that
/// it recognizes the bytes. Implementations must be pure and deterministic
/// (`spec.md` §8: "Probe monotonicity").
pub trait Probe {
    const FORMAT: FormatId;
    fn test(store: &dyn ChunkStore) -> Confidence;
}

/// One scored `(ordering, format)` candidate, as produced by running every
/// registered probe over every plausible ordering of the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub format: FormatId,
    pub ordering: SectorOrdering,
    pub confidence: Confidence,
}

/// Picks the best-scoring candidate, if any scored better than [`Confidence::No`].
/// Mount drivers call this after collecting scores across every
/// `(ordering, format)` pair they tried (`spec.md` §9: "let the mount driver
/// combine scores across `(ordering, format)` candidates").
pub fn best_candidate(candidates: &[Candidate]) -> Option<Candidate> {
    candidates
        .iter()
        .filter(|c| c.confidence > Confidence::No)
        .max_by_key(|c| c.confidence)
        .copied()
}
