//! DOS 3.3 / ProDOS / Apple Pascal hybrid images (`spec.md` §4.10, first
//! bullet): a single 5.25" 16-sector disk carrying a normal DOS 3.3 catalog
//! alongside a ProDOS or Pascal partition in the low tracks, the same bytes
//! read a second way with `SectorOrdering::ProDos` block addressing.
//!
//! Apple's classic hybrid disks put the foreign partition in tracks
//! `0..bad_tracks` and leave a dummy `.BAD` catalog entry in DOS's own
//! directory whose size marks exactly those tracks off-limits to DOS's free
//! sector search. Finding that entry and trusting its length is the only
//! practical way to locate the partition without a full nibble-level
//! cross-reference, and is what this module does (see `DESIGN.md` for the
//! spec wording this resolves).

use paleofs_core::engine::Engine;
use paleofs_core::error::Result;
use paleofs_core::probe::{best_candidate, Candidate, Confidence, FormatId, Probe};
use paleofs_core::tracker::{OpenMode, Part};
use paleofs_dos::{DosEngine, DosProbe};
use paleofs_io::{ChunkStore, Geometry, SectorOrdering, SubsetView};
use paleofs_prodos::{PascalProbe, ProdosProbe};

use crate::EmbeddedPartition;

pub fn find_dos_hybrid<S: ChunkStore>(store: &mut S) -> Result<Option<EmbeddedPartition>> {
    let geometry = store.geometry();
    let (tracks, sectors_per_track) = match geometry {
        Geometry::Sectored {
            tracks,
            sectors_per_track,
        } if sectors_per_track == 16 => (tracks, sectors_per_track),
        _ => return Ok(None),
    };

    if <DosProbe as Probe>::test(&*store) < Confidence::Maybe {
        return Ok(None);
    }

    let total_blocks = (tracks as u64 * sectors_per_track as u64 * 256) / 512;
    let prodos_geometry = Geometry::Blocked {
        block_count: total_blocks,
    };
    let candidate = {
        let view = SubsetView::contiguous(&mut *store, 0, prodos_geometry, SectorOrdering::ProDos);
        let candidates = [
            Candidate {
                format: FormatId::Prodos,
                ordering: SectorOrdering::ProDos,
                confidence: <ProdosProbe as Probe>::test(&view),
            },
            Candidate {
                format: FormatId::Pascal,
                ordering: SectorOrdering::ProDos,
                confidence: <PascalProbe as Probe>::test(&view),
            },
        ];
        best_candidate(&candidates)
    };
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    match candidate.format {
        FormatId::Prodos => Ok(Some(EmbeddedPartition {
            format: FormatId::Prodos,
            start_block: 0,
            block_count: total_blocks,
            ordering: SectorOrdering::ProDos,
        })),
        FormatId::Pascal => find_bad_marked_partition(store, tracks, sectors_per_track),
        _ => Ok(None),
    }
}

/// Locates the `.BAD` catalog entry and, if its size cleanly covers a whole
/// number of tracks starting at track 0, confirms Pascal probes within that
/// narrower range.
fn find_bad_marked_partition<S: ChunkStore>(
    store: &mut S,
    tracks: u32,
    sectors_per_track: u32,
) -> Result<Option<EmbeddedPartition>> {
    let geometry = Geometry::Sectored {
        tracks,
        sectors_per_track,
    };
    let dos_view = SubsetView::contiguous(&mut *store, 0, geometry, SectorOrdering::Dos);
    let mut engine = DosEngine::mount(dos_view)?;
    let root = engine.root();

    let bad = engine
        .children(root)?
        .into_iter()
        .find(|&r| matches!(engine.entry(r), Ok(e) if e.name.eq_ignore_ascii_case(".BAD")));
    let Some(bad) = bad else {
        return Ok(None);
    };

    let bad_len = engine.len_of(bad, Part::RawData, OpenMode::Ro)?;
    drop(engine);

    let bad_sectors = bad_len.div_ceil(256);
    let bad_tracks = bad_sectors.div_ceil(sectors_per_track as u64);
    if bad_tracks == 0 || bad_tracks > tracks as u64 {
        return Ok(None);
    }

    let partition_blocks = (bad_tracks * sectors_per_track as u64 * 256) / 512;
    let view = SubsetView::contiguous(
        &mut *store,
        0,
        Geometry::Blocked {
            block_count: partition_blocks,
        },
        SectorOrdering::ProDos,
    );
    if <PascalProbe as Probe>::test(&view) < Confidence::Maybe {
        return Ok(None);
    }

    Ok(Some(EmbeddedPartition {
        format: FormatId::Pascal,
        start_block: 0,
        block_count: partition_blocks,
        ordering: SectorOrdering::ProDos,
    }))
}
