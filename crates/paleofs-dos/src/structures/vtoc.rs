//! Volume Table Of Contents: the single sector at `(VTOC_TRACK, 0)` holding
//! geometry, the catalog head, and the free-sector bitmap (`spec.md` §3, §4.7).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const VTOC_TRACK: u8 = 17;
pub const MAX_TRACKS: usize = 50;

#[repr(C, packed)]
#[derive(Clone, Copy, KnownLayout, Immutable, IntoBytes, FromBytes)]
pub struct RawVtoc {
    unused0: u8,
    catalog_track: u8,
    catalog_sector: u8,
    dos_release: u8,
    unused1: [u8; 2],
    volume: u8,
    unused2: [u8; 32],
    max_ts_pairs: u8,
    unused3: [u8; 8],
    last_track: u8,
    last_direction: i8,
    unused4: [u8; 2],
    tracks: u8,
    sectors: u8,
    bytes_per_sector: [u8; 2],
    bitmap: [u8; MAX_TRACKS * 4],
}

/// The validated, native-endian view of a VTOC, independent of the raw byte
/// layout (`spec.md` §9: "store raw bytes ... re-serialize on flush").
///
/// `vtoc_track` is not part of the on-disk sector at all: it is the track the
/// caller had to already know in order to read this sector in the first
/// place (`spec.md:82`'s "VTOC at T17/S0 by default, overridable by option").
/// It is carried here, rather than threaded as a loose parameter through
/// every allocation call, purely so [`VtocInfo::next_free_sector`] and
/// [`VtocInfo::note_allocation`] know which track is permanently reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtocInfo {
    pub catalog_track: u8,
    pub catalog_sector: u8,
    pub dos_release: u8,
    pub volume: u8,
    pub max_ts_pairs: u8,
    pub last_track: u8,
    pub last_direction: i8,
    pub tracks: u8,
    pub sectors: u8,
    pub bytes_per_sector: u16,
    pub bitmap: [u8; MAX_TRACKS * 4],
    pub vtoc_track: u8,
}

impl From<&RawVtoc> for VtocInfo {
    fn from(raw: &RawVtoc) -> Self {
        Self {
            catalog_track: raw.catalog_track,
            catalog_sector: raw.catalog_sector,
            dos_release: raw.dos_release,
            volume: raw.volume,
            max_ts_pairs: raw.max_ts_pairs,
            last_track: raw.last_track,
            last_direction: raw.last_direction,
            tracks: raw.tracks,
            sectors: raw.sectors,
            bytes_per_sector: u16::from_le_bytes(raw.bytes_per_sector),
            bitmap: raw.bitmap,
            vtoc_track: VTOC_TRACK,
        }
    }
}

impl From<&VtocInfo> for RawVtoc {
    fn from(info: &VtocInfo) -> Self {
        Self {
            unused0: 0,
            catalog_track: info.catalog_track,
            catalog_sector: info.catalog_sector,
            dos_release: info.dos_release,
            unused1: [0; 2],
            volume: info.volume,
            unused2: [0; 32],
            max_ts_pairs: info.max_ts_pairs,
            unused3: [0; 8],
            last_track: info.last_track,
            last_direction: info.last_direction,
            unused4: [0; 2],
            tracks: info.tracks,
            sectors: info.sectors,
            bytes_per_sector: info.bytes_per_sector.to_le_bytes(),
            bitmap: info.bitmap,
        }
    }
}

impl VtocInfo {
    /// `vtoc_track` is the track this sector was actually read from (or will
    /// be written to); it has no corresponding field in the raw bytes.
    pub fn from_bytes(bytes: &[u8; 256], vtoc_track: u8) -> Self {
        let raw = RawVtoc::read_from_bytes(bytes).expect("VTOC sector is exactly 256 bytes");
        let mut info = VtocInfo::from(&raw);
        info.vtoc_track = vtoc_track;
        info
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        let raw = RawVtoc::from(self);
        let mut out = [0u8; 256];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// `eff_sec = sector + 32 - sectors_per_track`, matching the big-endian
    /// per-track word DOS itself uses (grounded in `dfgordon-a2kit`'s
    /// `get_track_map`/`allocate_sector`).
    fn track_word(&self, track: u8) -> u32 {
        let i = track as usize * 4;
        u32::from_be_bytes([
            self.bitmap[i],
            self.bitmap[i + 1],
            self.bitmap[i + 2],
            self.bitmap[i + 3],
        ])
    }

    fn set_track_word(&mut self, track: u8, word: u32) {
        let i = track as usize * 4;
        self.bitmap[i..i + 4].copy_from_slice(&word.to_be_bytes());
    }

    fn eff_sector(&self, sector: u8) -> u32 {
        sector as u32 + 32 - self.sectors as u32
    }

    pub fn is_sector_free(&self, track: u8, sector: u8) -> bool {
        (self.track_word(track) & (1 << self.eff_sector(sector))) != 0
    }

    pub fn mark_sector(&mut self, track: u8, sector: u8, free: bool) {
        let bit = 1u32 << self.eff_sector(sector);
        let mut word = self.track_word(track);
        if free {
            word |= bit;
        } else {
            word &= !bit;
        }
        self.set_track_word(track, word);
    }

    pub fn mark_track(&mut self, track: u8, free: bool) {
        for sector in 0..self.sectors {
            self.mark_sector(track, sector, free);
        }
    }

    pub fn count_free(&self) -> usize {
        (0..self.tracks)
            .flat_map(|t| (0..self.sectors).map(move |s| (t, s)))
            .filter(|&(t, s)| self.is_sector_free(t, s))
            .count()
    }

    /// Finds the next free sector in DOS's own allocation order: sectors
    /// are tried high-to-low within a track, and tracks are walked outward
    /// from the catalog track, continuing past the far edge on one side
    /// before sweeping back across the other (`spec.md` §4.7 "outward from
    /// track 17"; order grounded in `dfgordon-a2kit`'s `get_next_free_sector`).
    ///
    /// `prefer_jump` mirrors `dfgordon-a2kit`'s own `prefer_jump` argument:
    /// a new file's first allocation (its T/S-list sector) jumps to the
    /// track past `last_track`, while every later allocation for the same
    /// file (data sectors, continuation T/S-list sectors) prefers to keep
    /// searching the current `last_track` first before the walk moves on.
    pub fn next_free_sector(&self, prefer_jump: bool) -> Option<(u8, u8)> {
        let vtoc_track = self.catalog_track_for_search();
        let tstart = match self.last_track {
            t if t >= self.tracks => vtoc_track.saturating_sub(1),
            t if t > vtoc_track && prefer_jump => t.saturating_add(1).min(self.tracks.saturating_sub(1)),
            t if t < vtoc_track && t > 0 && prefer_jump => t - 1,
            t => t,
        };
        let search_tracks: Vec<u8> = if tstart < vtoc_track {
            (1..=tstart)
                .rev()
                .chain(vtoc_track + 1..self.tracks)
                .chain((tstart + 1..vtoc_track).rev())
                .collect()
        } else {
            (tstart..self.tracks)
                .chain((1..vtoc_track).rev())
                .chain(vtoc_track + 1..tstart)
                .collect()
        };
        for track in search_tracks {
            for sector in (0..self.sectors).rev() {
                if self.is_sector_free(track, sector) {
                    return Some((track, sector));
                }
            }
        }
        None
    }

    /// The VTOC's own track is never part of the free search (it and the
    /// catalog chain it roots are permanently allocated).
    fn catalog_track_for_search(&self) -> u8 {
        self.vtoc_track
    }

    /// Records that `track` was the most recently allocated track, for the
    /// next `next_free_sector` search (`spec.md` §4.7's "last track" state;
    /// semantics of `last_direction` are a documented guess, matching
    /// `dfgordon-a2kit`'s own admission that the DOS manual's description
    /// does not fully pin this down).
    pub fn note_allocation(&mut self, track: u8) {
        let vtoc_track = self.catalog_track_for_search();
        if track < vtoc_track {
            self.last_direction = -1;
            self.last_track = track;
        } else if track > vtoc_track {
            self.last_direction = 1;
            self.last_track = track;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(tracks: u8, sectors: u8) -> VtocInfo {
        VtocInfo {
            catalog_track: VTOC_TRACK,
            catalog_sector: sectors - 1,
            dos_release: 3,
            volume: 254,
            max_ts_pairs: 0x7a,
            last_track: VTOC_TRACK,
            last_direction: 1,
            tracks,
            sectors,
            bytes_per_sector: 256,
            bitmap: [0; MAX_TRACKS * 4],
            vtoc_track: VTOC_TRACK,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut vtoc = blank(35, 16);
        vtoc.mark_track(1, true);
        let bytes = vtoc.to_bytes();
        let back = VtocInfo::from_bytes(&bytes, VTOC_TRACK);
        assert_eq!(back, vtoc);
    }

    #[test]
    fn mark_and_query_sector() {
        let mut vtoc = blank(35, 16);
        assert!(!vtoc.is_sector_free(1, 5));
        vtoc.mark_sector(1, 5, true);
        assert!(vtoc.is_sector_free(1, 5));
        vtoc.mark_sector(1, 5, false);
        assert!(!vtoc.is_sector_free(1, 5));
    }

    #[test]
    fn mark_track_frees_every_sector() {
        let mut vtoc = blank(35, 16);
        vtoc.mark_track(3, true);
        assert_eq!(vtoc.count_free(), 16);
    }

    #[test]
    fn next_free_sector_prefers_high_sectors_first() {
        let mut vtoc = blank(35, 16);
        vtoc.mark_track(18, true);
        assert_eq!(vtoc.next_free_sector(true), Some((18, 15)));
    }

    #[test]
    fn next_free_sector_walks_outward_from_vtoc_track() {
        let mut vtoc = blank(35, 16);
        vtoc.mark_track(16, true);
        vtoc.mark_track(18, true);
        // last_track == VTOC_TRACK, last_direction > 0 => search starts at
        // VTOC_TRACK+1 = 18 first.
        assert_eq!(vtoc.next_free_sector(true), Some((18, 15)));
    }

    #[test]
    fn next_free_sector_without_prefer_jump_stays_on_last_track_first() {
        let mut vtoc = blank(35, 16);
        vtoc.last_track = 20;
        vtoc.last_direction = 1;
        vtoc.mark_track(20, true);
        vtoc.mark_track(21, true);
        // prefer_jump=false keeps searching track 20 (last_track) before
        // moving on, instead of jumping straight to 21.
        assert_eq!(vtoc.next_free_sector(false), Some((20, 15)));
    }

    #[test]
    fn no_free_sector_when_disk_full() {
        let vtoc = blank(35, 16);
        assert_eq!(vtoc.next_free_sector(true), None);
    }
}
