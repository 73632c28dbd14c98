//! DOS 3.x format probe (`spec.md` §4.4): walks the catalog chain and scores
//! it, rather than checking a single signature, since DOS has none.

use paleofs_core::probe::{Confidence, FormatId, Probe};
use paleofs_io::ChunkStore;

use crate::geometry;
use crate::structures::catalog::CatalogSectorInfo;
use crate::structures::vtoc::{VtocInfo, VTOC_TRACK};

pub struct DosProbe;

impl Probe for DosProbe {
    const FORMAT: FormatId = FormatId::Dos;

    /// Only ever probes the default VTOC location. A volume formatted with
    /// an overridden `vtoc_track` (`spec.md:82`) needs the caller to already
    /// know where to look, which a blind probe-by-signature cannot — the
    /// same way `DosEngine::mount_at` needs the override passed in.
    fn test(store: &dyn ChunkStore) -> Confidence {
        if !geometry::is_allowed(&store.geometry()) {
            return Confidence::No;
        }
        let mut vtoc_bytes = [0u8; 256];
        if store.read_sector(VTOC_TRACK as u32, 0, &mut vtoc_bytes).is_err() {
            return Confidence::No;
        }
        let vtoc = VtocInfo::from_bytes(&vtoc_bytes, VTOC_TRACK);
        let (tracks, sectors) = match store.geometry() {
            paleofs_io::Geometry::Sectored {
                tracks,
                sectors_per_track,
            } => (tracks, sectors_per_track),
            _ => return Confidence::No,
        };
        if vtoc.tracks as u32 != tracks || vtoc.sectors as u32 != sectors {
            return Confidence::No;
        }

        let mut score: u32 = 0;
        let mut current = (vtoc.catalog_track, vtoc.catalog_sector);
        for _ in 0..crate::structures::catalog::MAX_CATALOG_SECTORS {
            if current.0 as u32 >= tracks || current.1 as u32 >= sectors {
                return Confidence::No;
            }
            let mut sector_bytes = [0u8; 256];
            if store
                .read_sector(current.0 as u32, current.1 as u32, &mut sector_bytes)
                .is_err()
            {
                return Confidence::No;
            }
            let sector = CatalogSectorInfo::from_bytes(&sector_bytes);
            let next = (sector.next_track, sector.next_sector);
            if next == (0, 0) {
                break;
            }
            if next.0 as u32 >= tracks || next.1 as u32 >= sectors {
                return Confidence::No;
            }
            score += if next.1 < current.1 { 2 } else { 1 };
            current = next;
        }

        match score {
            s if s >= 29 => Confidence::Yes,
            s if s >= 11 => Confidence::Good,
            s if s >= 2 => Confidence::Maybe,
            1 => Confidence::Barely,
            _ => Confidence::No,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{CatalogSlot, TsListInfo};
    use paleofs_io::{Geometry, MemStore, SectorOrdering};

    fn formatted_image() -> MemStore {
        let mut store = MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        );
        let vtoc = VtocInfo {
            catalog_track: 17,
            catalog_sector: 15,
            dos_release: 3,
            volume: 254,
            max_ts_pairs: 0x7a,
            last_track: 17,
            last_direction: 1,
            tracks: 35,
            sectors: 16,
            bytes_per_sector: 256,
            bitmap: [0; crate::structures::vtoc::MAX_TRACKS * 4],
            vtoc_track: 17,
        };
        store.write_sector(17, 0, &vtoc.to_bytes()).unwrap();
        for sector in (1..=15u32).rev() {
            let mut info = CatalogSectorInfo::empty();
            if sector > 1 {
                info.next_track = 17;
                info.next_sector = (sector - 1) as u8;
            }
            store.write_sector(17, sector, &info.to_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn scores_a_clean_descending_chain_as_yes() {
        let store = formatted_image();
        assert_eq!(DosProbe::test(&store), Confidence::Yes);
    }

    #[test]
    fn rejects_disallowed_geometry() {
        let store = MemStore::new(
            vec![0u8; 40 * 13 * 256],
            Geometry::Sectored {
                tracks: 40,
                sectors_per_track: 13,
            },
            SectorOrdering::Dos,
        );
        assert_eq!(DosProbe::test(&store), Confidence::No);
    }

    #[test]
    fn unused_slot_is_not_confused_with_a_link() {
        let mut store = formatted_image();
        let mut bytes = [0u8; 256];
        store.read_sector(17, 15, &mut bytes).unwrap();
        let mut info = CatalogSectorInfo::from_bytes(&bytes);
        info.slots[0] = CatalogSlot::Unused;
        store.write_sector(17, 15, &info.to_bytes()).unwrap();
        assert_eq!(DosProbe::test(&store), Confidence::Yes);
        let _ = TsListInfo::empty(0);
    }
}
