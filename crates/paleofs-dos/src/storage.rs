//! Track/sector-list chain walking, growth, and truncation — the mechanics
//! behind `spec.md` §4.7's "Growth", "Truncation", and "Sparse seek" bullets.

use paleofs_core::error::{Error, Result};
use paleofs_io::ChunkStore;

use crate::structures::tslist::{PAIRS_PER_SECTOR, MAX_CHAIN_LEN};
use crate::structures::vtoc::VtocInfo;
use crate::structures::{TsListInfo, TsPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsListAddr {
    pub track: u8,
    pub sector: u8,
}

impl TsListAddr {
    pub const NONE: TsListAddr = TsListAddr { track: 0, sector: 0 };

    pub fn is_none(&self) -> bool {
        self.track == 0 && self.sector == 0
    }
}

fn read_sector(store: &dyn ChunkStore, addr: TsListAddr) -> Result<[u8; 256]> {
    let mut buf = [0u8; 256];
    store.read_sector(addr.track as u32, addr.sector as u32, &mut buf)?;
    Ok(buf)
}

fn write_sector(store: &mut dyn ChunkStore, addr: TsListAddr, bytes: &[u8; 256]) -> Result<()> {
    store.write_sector(addr.track as u32, addr.sector as u32, bytes)?;
    Ok(())
}

/// Loads the full chain of T/S-list sectors starting at `first`, capped at
/// `MAX_CHAIN_LEN` (`spec.md` §4.7: "capped at 540 to avoid 16-bit offset
/// wraparound"). An empty `first` (0,0) yields an empty chain.
pub fn load_chain(store: &dyn ChunkStore, first: TsListAddr) -> Result<Vec<(TsListAddr, TsListInfo)>> {
    let mut chain = Vec::new();
    let mut addr = first;
    while !addr.is_none() {
        if chain.len() >= MAX_CHAIN_LEN {
            return Err(Error::Damaged);
        }
        let bytes = read_sector(store, addr)?;
        let list = TsListInfo::from_bytes(&bytes);
        let next = TsListAddr {
            track: list.next_track,
            sector: list.next_sector,
        };
        chain.push((addr, list));
        addr = next;
    }
    Ok(chain)
}

/// The raw "sectors used" length: `(highest non-sparse pair index + 1) * 256`
/// (`spec.md` §4.7 "RawData: sectors_used × 256"); sparse trailing entries
/// before the high-water mark read as zero, matching the sparse-seek scenario
/// in §8 (a single far write allocates only the touched sector).
pub fn raw_len(chain: &[(TsListAddr, TsListInfo)]) -> u64 {
    let mut highest = None;
    for (list_idx, (_, list)) in chain.iter().enumerate() {
        for (pair_idx, pair) in list.pairs.iter().enumerate() {
            if !pair.is_sparse() {
                let logical = list_idx * PAIRS_PER_SECTOR + pair_idx;
                highest = Some(highest.map_or(logical, |h: usize| h.max(logical)));
            }
        }
    }
    highest.map(|h| (h as u64 + 1) * 256).unwrap_or(0)
}

fn resolve(chain: &[(TsListAddr, TsListInfo)], logical_sector: usize) -> Option<TsPair> {
    let list_idx = logical_sector / PAIRS_PER_SECTOR;
    let pair_idx = logical_sector % PAIRS_PER_SECTOR;
    chain.get(list_idx).map(|(_, l)| l.pairs[pair_idx])
}

/// Reads up to `buf.len()` bytes from the raw byte stream at `offset`,
/// treating sparse sectors as zero-filled, stopping at the file's raw length.
pub fn read_raw(store: &dyn ChunkStore, chain: &[(TsListAddr, TsListInfo)], offset: u64, buf: &mut [u8]) -> Result<usize> {
    let total = raw_len(chain);
    let available = total.saturating_sub(offset) as usize;
    let want = buf.len().min(available);
    let mut written = 0usize;
    while written < want {
        let pos = offset + written as u64;
        let logical_sector = (pos / 256) as usize;
        let in_off = (pos % 256) as usize;
        let take = (256 - in_off).min(want - written);
        match resolve(chain, logical_sector) {
            Some(pair) if !pair.is_sparse() => {
                let sector_buf = read_sector(
                    store,
                    TsListAddr {
                        track: pair.track,
                        sector: pair.sector,
                    },
                )?;
                buf[written..written + take].copy_from_slice(&sector_buf[in_off..in_off + take]);
            }
            _ => buf[written..written + take].fill(0),
        }
        written += take;
    }
    Ok(written)
}

/// Finds the next logical sector at/after `from_sector` holding data (if
/// `want_hole` is false) or a sparse hole (if true), bounded by the chain's
/// allocated capacity, returning a byte offset. `spec.md` §6's sparse-aware
/// seek origins.
pub fn next_data_or_hole(chain: &[(TsListAddr, TsListInfo)], from_sector: usize, want_hole: bool) -> Option<u64> {
    let capacity = chain.len() * PAIRS_PER_SECTOR;
    for logical in from_sector..capacity {
        let is_hole = resolve(chain, logical).map(|p| p.is_sparse()).unwrap_or(true);
        if is_hole == want_hole {
            return Some(logical as u64 * 256);
        }
    }
    None
}

/// Picks and marks-used the next free sector, recording it as the most
/// recently allocated track for the search order. `prefer_jump` distinguishes
/// a new file's first allocation (jumps past `last_track`) from every later
/// allocation for the same file (stays on `last_track` first), matching
/// `dfgordon-a2kit`'s `get_next_free_sector(prefer_jump)`.
fn alloc_sector(vtoc: &mut VtocInfo, prefer_jump: bool) -> Result<(u8, u8)> {
    let (track, sector) = vtoc.next_free_sector(prefer_jump).ok_or(Error::DiskFull)?;
    vtoc.mark_sector(track, sector, false);
    vtoc.note_allocation(track);
    Ok((track, sector))
}

fn free_sector(vtoc: &mut VtocInfo, track: u8, sector: u8) {
    vtoc.mark_sector(track, sector, true);
}

/// Ensures the chain has a T/S-list sector covering `logical_sector`,
/// allocating and linking new list sectors as needed. Mutates `chain` and
/// `first` in place and persists every newly written list sector.
/// On allocation failure, frees whatever it allocated this call before
/// returning (`spec.md` §4.7: "Failure mid-grow frees the most recent
/// allocation").
fn ensure_list_capacity(
    store: &mut dyn ChunkStore,
    vtoc: &mut VtocInfo,
    chain: &mut Vec<(TsListAddr, TsListInfo)>,
    first: &mut TsListAddr,
    logical_sector: usize,
) -> Result<()> {
    let needed_lists = logical_sector / PAIRS_PER_SECTOR + 1;
    let mut newly_allocated = Vec::new();
    while chain.len() < needed_lists {
        if chain.len() >= MAX_CHAIN_LEN {
            for (track, sector) in newly_allocated {
                free_sector(vtoc, track, sector);
            }
            return Err(Error::FileTooLarge);
        }
        match alloc_sector(vtoc, false) {
            Ok((track, sector)) => {
                newly_allocated.push((track, sector));
                let addr = TsListAddr { track, sector };
                let offset = (chain.len() * PAIRS_PER_SECTOR) as u16;
                let list = TsListInfo::empty(offset);
                write_sector(store, addr, &list.to_bytes())?;
                if let Some((_, last)) = chain.last_mut() {
                    last.next_track = track;
                    last.next_sector = sector;
                    let (last_addr, last_list) = chain.last().unwrap();
                    write_sector(store, *last_addr, &last_list.to_bytes())?;
                } else {
                    *first = addr;
                }
                chain.push((addr, list));
            }
            Err(e) => {
                for (track, sector) in newly_allocated {
                    free_sector(vtoc, track, sector);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Allocates a fresh, empty T/S-list sector for a newly created file with no
/// data yet. DOS marks a catalog slot `Used` only once it has a valid T/S
/// list pointer, so `create` must reserve this before the slot is written.
pub fn alloc_empty_chain(store: &mut dyn ChunkStore, vtoc: &mut VtocInfo) -> Result<TsListAddr> {
    let (track, sector) = alloc_sector(vtoc, true)?;
    let addr = TsListAddr { track, sector };
    write_sector(store, addr, &TsListInfo::empty(0).to_bytes())?;
    Ok(addr)
}

/// Writes `buf` at `offset`, allocating list and data sectors as needed to
/// cover the touched range, persisting every sector it touches.
pub fn write_raw(
    store: &mut dyn ChunkStore,
    vtoc: &mut VtocInfo,
    chain: &mut Vec<(TsListAddr, TsListInfo)>,
    first: &mut TsListAddr,
    offset: u64,
    buf: &[u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let last_byte = offset + buf.len() as u64 - 1;
    let last_logical_sector = (last_byte / 256) as usize;
    ensure_list_capacity(store, vtoc, chain, first, last_logical_sector)?;

    let mut written = 0usize;
    while written < buf.len() {
        let pos = offset + written as u64;
        let logical_sector = (pos / 256) as usize;
        let in_off = (pos % 256) as usize;
        let take = (256 - in_off).min(buf.len() - written);

        let list_idx = logical_sector / PAIRS_PER_SECTOR;
        let pair_idx = logical_sector % PAIRS_PER_SECTOR;
        let mut pair = chain[list_idx].1.pairs[pair_idx];
        if pair.is_sparse() {
            match alloc_sector(vtoc, false) {
                Ok((track, sector)) => pair = TsPair { track, sector },
                Err(e) => return Err(e),
            }
            chain[list_idx].1.pairs[pair_idx] = pair;
            let (addr, list) = &chain[list_idx];
            write_sector(store, *addr, &list.to_bytes())?;
        }

        let mut sector_buf = if in_off != 0 || take < 256 {
            read_sector(store, TsListAddr { track: pair.track, sector: pair.sector })?
        } else {
            [0u8; 256]
        };
        sector_buf[in_off..in_off + take].copy_from_slice(&buf[written..written + take]);
        write_sector(store, TsListAddr { track: pair.track, sector: pair.sector }, &sector_buf)?;

        written += take;
    }
    Ok(written)
}

/// Truncates/extends the logical length to `new_len` bytes. Shrinking frees
/// data sectors past the new EOF and cuts the list chain once a list
/// sector's sectors are entirely beyond it, freeing any list sector that
/// becomes wholly empty (`spec.md` §4.7 "Truncation"). Growing only needs to
/// update the high-water mark; no sectors are allocated until written.
pub fn set_len(
    store: &mut dyn ChunkStore,
    vtoc: &mut VtocInfo,
    chain: &mut Vec<(TsListAddr, TsListInfo)>,
    first: &mut TsListAddr,
    new_len: u64,
) -> Result<()> {
    let new_last_sector = if new_len == 0 { None } else { Some(((new_len - 1) / 256) as usize) };

    for (list_idx, (_, list)) in chain.iter_mut().enumerate() {
        for (pair_idx, pair) in list.pairs.iter_mut().enumerate() {
            let logical = list_idx * PAIRS_PER_SECTOR + pair_idx;
            let keep = new_last_sector.is_some_and(|last| logical <= last);
            if !keep && !pair.is_sparse() {
                free_sector(vtoc, pair.track, pair.sector);
                *pair = TsPair::SPARSE;
            }
        }
    }

    let needed_lists = new_last_sector.map(|last| last / PAIRS_PER_SECTOR + 1).unwrap_or(0);
    while chain.len() > needed_lists {
        let (addr, _) = chain.pop().unwrap();
        free_sector(vtoc, addr.track, addr.sector);
    }
    if let Some((last_addr, last_list)) = chain.last_mut() {
        last_list.next_track = 0;
        last_list.next_sector = 0;
        write_sector(store, *last_addr, &last_list.to_bytes())?;
    } else {
        *first = TsListAddr::NONE;
    }
    for (addr, list) in chain.iter() {
        write_sector(store, *addr, &list.to_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_io::{Geometry, MemStore, SectorOrdering};

    fn fresh_store() -> MemStore {
        MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        )
    }

    fn fresh_vtoc() -> VtocInfo {
        let mut vtoc = VtocInfo {
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
        for track in 0..35u8 {
            if track != 17 {
                vtoc.mark_track(track, true);
            }
        }
        vtoc
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut store = fresh_store();
        let mut vtoc = fresh_vtoc();
        let mut chain: Vec<(TsListAddr, TsListInfo)> = Vec::new();
        let mut first = TsListAddr::NONE;

        write_raw(&mut store, &mut vtoc, &mut chain, &mut first, 0, b"hello").unwrap();
        assert_eq!(raw_len(&chain), 256);

        let mut buf = [0u8; 5];
        read_raw(&store, &chain, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn sparse_growth_allocates_one_list_and_data_sector() {
        let mut store = fresh_store();
        let mut vtoc = fresh_vtoc();
        let mut chain: Vec<(TsListAddr, TsListInfo)> = Vec::new();
        let mut first = TsListAddr::NONE;

        let far_offset = PAIRS_PER_SECTOR as u64 * 256;
        write_raw(&mut store, &mut vtoc, &mut chain, &mut first, far_offset, &[0xaa]).unwrap();

        assert_eq!(chain.len(), 2);
        assert!(chain[0].1.pairs.iter().all(|p| p.is_sparse()));
        assert!(!chain[1].1.pairs[0].is_sparse());

        let mut buf = [0u8; 1];
        read_raw(&store, &chain, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0);
        read_raw(&store, &chain, far_offset, &mut buf).unwrap();
        assert_eq!(buf[0], 0xaa);
    }

    #[test]
    fn truncate_frees_sectors_and_cuts_chain() {
        let mut store = fresh_store();
        let mut vtoc = fresh_vtoc();
        let mut chain: Vec<(TsListAddr, TsListInfo)> = Vec::new();
        let mut first = TsListAddr::NONE;

        write_raw(&mut store, &mut vtoc, &mut chain, &mut first, 0, &[1; 512]).unwrap();
        let free_before = vtoc.count_free();

        set_len(&mut store, &mut vtoc, &mut chain, &mut first, 256).unwrap();
        assert_eq!(raw_len(&chain), 256);
        assert!(vtoc.count_free() > free_before);
    }

    #[test]
    fn truncate_to_zero_frees_the_list_sector_too() {
        let mut store = fresh_store();
        let mut vtoc = fresh_vtoc();
        let mut chain: Vec<(TsListAddr, TsListInfo)> = Vec::new();
        let mut first = TsListAddr::NONE;

        write_raw(&mut store, &mut vtoc, &mut chain, &mut first, 0, &[1; 10]).unwrap();
        set_len(&mut store, &mut vtoc, &mut chain, &mut first, 0).unwrap();
        assert!(chain.is_empty());
        assert!(first.is_none());
    }
}
