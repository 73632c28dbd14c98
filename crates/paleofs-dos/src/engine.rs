//! The `paleofs_core::Engine` implementation for DOS 3.2/3.3 images
//! (`spec.md` §4.7).

use paleofs_common::{FileId, Owner, VolumeUsage};
use paleofs_core::engine::{CreateMode, Engine};
use paleofs_core::entry::{Access, DirEntry, EntryStatus, Sizes, Timestamps, TypeInfo};
use paleofs_core::error::{Error, Result};
use paleofs_core::notes::Notes;
use paleofs_core::tracker::{OpenMode, Part};
use paleofs_io::{AccessLevel, ChunkStore, Geometry};

use crate::geometry;
use crate::length::{self, CookedLayout};
use crate::storage::{self, TsListAddr};
use crate::structures::catalog::{decode_name, encode_name, MAX_CATALOG_SECTORS};
use crate::structures::tslist::PAIRS_PER_SECTOR;
use crate::structures::vtoc::{MAX_TRACKS, VTOC_TRACK};
use crate::structures::{CatalogSectorInfo, CatalogSlot, DosType, VtocInfo};

/// A DOS entry is either the synthesized volume directory or a specific
/// catalog slot, named by the catalog sector that holds it plus the slot
/// index within that sector (`spec.md` §9: "back-references are non-owning
/// lookups" — this never borrows from the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DosEntryRef {
    Root,
    File { track: u8, sector: u8, slot: u8 },
}

pub struct DosEngine<S: ChunkStore> {
    store: S,
    vtoc: VtocInfo,
    vtoc_track: u8,
    access_level: AccessLevel,
    notes: Notes,
}

impl<S: ChunkStore> DosEngine<S> {
    /// Mounts an existing DOS image at the default VTOC location (T17/S0).
    pub fn mount(store: S) -> Result<Self> {
        Self::mount_at(store, VTOC_TRACK)
    }

    /// Mounts an existing DOS image, validating its VTOC against the store's
    /// own geometry. `vtoc_track` overrides the default T17 location
    /// (`spec.md:82`: "VTOC at T17/S0 by default, overridable by option").
    pub fn mount_at(store: S, vtoc_track: u8) -> Result<Self> {
        if !geometry::is_allowed(&store.geometry()) {
            return Err(Error::InvalidImage);
        }
        let (tracks, sectors) = match store.geometry() {
            Geometry::Sectored {
                tracks,
                sectors_per_track,
            } => (tracks, sectors_per_track),
            Geometry::Blocked { .. } => return Err(Error::InvalidImage),
        };
        let mut buf = [0u8; 256];
        store.read_sector(vtoc_track as u32, 0, &mut buf)?;
        let vtoc = VtocInfo::from_bytes(&buf, vtoc_track);
        if vtoc.tracks as u32 != tracks || vtoc.sectors as u32 != sectors {
            return Err(Error::InvalidImage);
        }
        Ok(Self {
            store,
            vtoc,
            vtoc_track,
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        })
    }

    /// Wraps a store with no on-disk DOS structures yet, at the default VTOC
    /// location; call [`Engine::format`] before doing anything else with it.
    pub fn blank(store: S) -> Self {
        Self::blank_at(store, VTOC_TRACK)
    }

    /// Same as [`DosEngine::blank`], but formatting will place the VTOC at
    /// `vtoc_track` instead of the default T17.
    pub fn blank_at(store: S, vtoc_track: u8) -> Self {
        Self {
            store,
            vtoc: VtocInfo {
                catalog_track: vtoc_track,
                catalog_sector: 0,
                dos_release: 3,
                volume: 254,
                max_ts_pairs: PAIRS_PER_SECTOR as u8,
                last_track: vtoc_track,
                last_direction: 1,
                tracks: 0,
                sectors: 0,
                bytes_per_sector: 256,
                bitmap: [0; MAX_TRACKS * 4],
                vtoc_track,
            },
            vtoc_track,
            access_level: AccessLevel::Closed,
            notes: Notes::new(),
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn read_sector_raw(&self, track: u8, sector: u8) -> Result<[u8; 256]> {
        let mut buf = [0u8; 256];
        self.store.read_sector(track as u32, sector as u32, &mut buf)?;
        Ok(buf)
    }

    /// Walks the catalog chain from the VTOC's head, returning every sector
    /// address in chain order. Capped at `MAX_CATALOG_SECTORS` the same way
    /// `DosProbe` is, since a real catalog never grows past that.
    fn catalog_addrs(&self) -> Result<Vec<(u8, u8)>> {
        let mut addrs = Vec::new();
        let mut cur = (self.vtoc.catalog_track, self.vtoc.catalog_sector);
        for _ in 0..MAX_CATALOG_SECTORS {
            addrs.push(cur);
            let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(cur.0, cur.1)?);
            if (info.next_track, info.next_sector) == (0, 0) {
                break;
            }
            cur = (info.next_track, info.next_sector);
        }
        Ok(addrs)
    }

    fn file_tsl_and_type(&self, r: DosEntryRef) -> Result<(TsListAddr, DosType)> {
        let DosEntryRef::File { track, sector, slot } = r else {
            return Err(Error::InvalidMode);
        };
        let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
        match info.slots.get(slot as usize) {
            Some(CatalogSlot::Used {
                tsl_track,
                tsl_sector,
                dos_type,
                ..
            }) => Ok((
                TsListAddr {
                    track: *tsl_track,
                    sector: *tsl_sector,
                },
                *dos_type,
            )),
            _ => Err(Error::NotFound),
        }
    }

    /// Reads the entire raw byte stream of a file's chain into memory. DOS
    /// images are small enough (at most a few hundred KB) that this is
    /// simpler than streaming cooked reads through the header logic.
    fn read_full_raw(&self, chain: &[(TsListAddr, crate::structures::TsListInfo)]) -> Result<Vec<u8>> {
        let total = storage::raw_len(chain);
        let mut full = vec![0u8; total as usize];
        if total > 0 {
            storage::read_raw(&self.store, chain, 0, &mut full)?;
        }
        Ok(full)
    }

    fn cooked_read(&self, tsl: TsListAddr, dos_type: DosType, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let layout = length::layout_for(dos_type);
        let chain = storage::load_chain(&self.store, tsl)?;
        let full = self.read_full_raw(&chain)?;
        let cooked_len = layout.cooked_len(&full);
        let data_off = layout.data_offset();
        let data_end = (data_off as u64 + cooked_len).min(full.len() as u64) as usize;
        let data = if data_off <= full.len() { &full[data_off..data_end.max(data_off)] } else { &[] };
        let available = (data.len() as u64).saturating_sub(offset);
        let want = buf.len().min(available as usize);
        if want > 0 {
            buf[..want].copy_from_slice(&data[offset as usize..offset as usize + want]);
        }
        Ok(want)
    }

    fn cooked_write(&mut self, tsl: TsListAddr, dos_type: DosType, offset: u64, buf: &[u8]) -> Result<usize> {
        let layout = length::layout_for(dos_type);
        let data_off = layout.data_offset() as u64;
        let mut chain = storage::load_chain(&self.store, tsl)?;
        let mut first = tsl;

        storage::write_raw(&mut self.store, &mut self.vtoc, &mut chain, &mut first, data_off + offset, buf)?;

        if matches!(layout, CookedLayout::HeaderAt0 | CookedLayout::HeaderAt2) {
            let full = self.read_full_raw(&chain)?;
            let old_cooked_len = layout.cooked_len(&full);
            let new_cooked_len = old_cooked_len.max(offset + buf.len() as u64);
            let mut header_buf = vec![0u8; data_off as usize];
            if full.len() >= header_buf.len() {
                header_buf.copy_from_slice(&full[..header_buf.len()]);
            }
            layout.write_header(&mut header_buf, new_cooked_len);
            storage::write_raw(&mut self.store, &mut self.vtoc, &mut chain, &mut first, 0, &header_buf)?;
        }
        Ok(buf.len())
    }

    fn cooked_set_len(&mut self, tsl: TsListAddr, dos_type: DosType, new_len: u64) -> Result<()> {
        let layout = length::layout_for(dos_type);
        let data_off = layout.data_offset() as u64;
        let mut chain = storage::load_chain(&self.store, tsl)?;
        let mut first = tsl;
        storage::set_len(&mut self.store, &mut self.vtoc, &mut chain, &mut first, data_off + new_len)?;
        if matches!(layout, CookedLayout::HeaderAt0 | CookedLayout::HeaderAt2) {
            let mut header_buf = self.read_full_raw(&chain)?;
            header_buf.resize(data_off as usize, 0);
            layout.write_header(&mut header_buf, new_len);
            storage::write_raw(&mut self.store, &mut self.vtoc, &mut chain, &mut first, 0, &header_buf)?;
        }
        Ok(())
    }
}

fn file_id(track: u8, sector: u8, slot: u8) -> FileId {
    FileId::new(((track as u64) << 16) | ((sector as u64) << 8) | slot as u64)
}

fn unit(track: u8, sector: u8) -> u64 {
    track as u64 * 64 + sector as u64
}

impl<S: ChunkStore> Engine for DosEngine<S> {
    type EntryRef = DosEntryRef;

    fn root(&self) -> Self::EntryRef {
        DosEntryRef::Root
    }

    fn entry(&self, r: Self::EntryRef) -> Result<DirEntry> {
        match r {
            DosEntryRef::Root => Ok(DirEntry {
                name: String::new(),
                raw_name: Vec::new(),
                access: Access::empty(),
                type_info: TypeInfo::VolumeDirectory,
                sizes: Sizes::default(),
                timestamps: Timestamps::default(),
                status: EntryStatus::default(),
            }),
            DosEntryRef::File { track, sector, slot } => {
                let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
                match info.slots.get(slot as usize) {
                    Some(CatalogSlot::Used {
                        tsl_track,
                        tsl_sector,
                        locked,
                        dos_type,
                        raw_name,
                        ..
                    }) => {
                        let chain = storage::load_chain(
                            &self.store,
                            TsListAddr {
                                track: *tsl_track,
                                sector: *tsl_sector,
                            },
                        )?;
                        let raw_total = storage::raw_len(&chain);
                        let full = self.read_full_raw(&chain)?;
                        let cooked = length::layout_for(*dos_type).cooked_len(&full);
                        let mut access = Access::empty();
                        if *locked {
                            access |= Access::LOCKED;
                        }
                        Ok(DirEntry {
                            name: decode_name(raw_name),
                            raw_name: raw_name.to_vec(),
                            access,
                            type_info: TypeInfo::Dos { file_type: dos_type.0 },
                            sizes: Sizes {
                                data_len: cooked,
                                rsrc_len: 0,
                                storage_len: raw_total,
                            },
                            timestamps: Timestamps::default(),
                            status: EntryStatus::default(),
                        })
                    }
                    _ => Err(Error::NotFound),
                }
            }
        }
    }

    fn children(&self, parent: Self::EntryRef) -> Result<Vec<Self::EntryRef>> {
        if parent != DosEntryRef::Root {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for (track, sector) in self.catalog_addrs()? {
            let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
            for (idx, slot) in info.slots.iter().enumerate() {
                if matches!(slot, CatalogSlot::Used { .. }) {
                    out.push(DosEntryRef::File {
                        track,
                        sector,
                        slot: idx as u8,
                    });
                }
            }
        }
        Ok(out)
    }

    fn supports_part(&self, part: Part) -> bool {
        matches!(part, Part::DataFork | Part::RawData)
    }

    fn scan_usage(&mut self) -> Result<VolumeUsage> {
        let mut usage = VolumeUsage::new();
        usage.set_owner(unit(self.vtoc_track, 0), Owner::System);

        let addrs = self.catalog_addrs()?;
        for &(t, s) in &addrs {
            usage.set_owner(unit(t, s), Owner::System);
        }
        for (t, s) in addrs {
            let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(t, s)?);
            for (idx, slot) in info.slots.iter().enumerate() {
                if let CatalogSlot::Used {
                    tsl_track, tsl_sector, ..
                } = slot
                {
                    let owner = Owner::File(file_id(t, s, idx as u8));
                    let chain = storage::load_chain(
                        &self.store,
                        TsListAddr {
                            track: *tsl_track,
                            sector: *tsl_sector,
                        },
                    )?;
                    for (addr, list) in &chain {
                        usage.set_owner(unit(addr.track, addr.sector), owner);
                        for pair in list.pairs.iter() {
                            if !pair.is_sparse() {
                                usage.set_owner(unit(pair.track, pair.sector), owner);
                            }
                        }
                    }
                }
            }
        }
        for track in 0..self.vtoc.tracks {
            for sector in 0..self.vtoc.sectors {
                if !self.vtoc.is_sector_free(track, sector) {
                    usage.mark_in_use(unit(track, sector));
                }
            }
        }
        Ok(usage)
    }

    fn read_at(&mut self, r: Self::EntryRef, part: Part, mode: OpenMode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let _ = mode;
        let (tsl, dos_type) = self.file_tsl_and_type(r)?;
        match part {
            Part::RawData => {
                let chain = storage::load_chain(&self.store, tsl)?;
                storage::read_raw(&self.store, &chain, offset, buf)
            }
            Part::DataFork => self.cooked_read(tsl, dos_type, offset, buf),
            Part::RsrcFork => Err(Error::NotSupported),
        }
    }

    fn write_at(&mut self, r: Self::EntryRef, part: Part, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (tsl, dos_type) = self.file_tsl_and_type(r)?;
        match part {
            Part::RawData => {
                let mut chain = storage::load_chain(&self.store, tsl)?;
                let mut first = tsl;
                storage::write_raw(&mut self.store, &mut self.vtoc, &mut chain, &mut first, offset, buf)
            }
            Part::DataFork => self.cooked_write(tsl, dos_type, offset, buf),
            Part::RsrcFork => Err(Error::NotSupported),
        }
    }

    fn len_of(&self, r: Self::EntryRef, part: Part, mode: OpenMode) -> Result<u64> {
        let _ = mode;
        let (tsl, dos_type) = self.file_tsl_and_type(r)?;
        let chain = storage::load_chain(&self.store, tsl)?;
        match part {
            Part::RawData => Ok(storage::raw_len(&chain)),
            Part::DataFork => {
                let full = self.read_full_raw(&chain)?;
                Ok(length::layout_for(dos_type).cooked_len(&full))
            }
            Part::RsrcFork => Err(Error::NotSupported),
        }
    }

    fn set_len(&mut self, r: Self::EntryRef, part: Part, new_len: u64) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let (tsl, dos_type) = self.file_tsl_and_type(r)?;
        match part {
            Part::RawData => {
                let mut chain = storage::load_chain(&self.store, tsl)?;
                let mut first = tsl;
                storage::set_len(&mut self.store, &mut self.vtoc, &mut chain, &mut first, new_len)
            }
            Part::DataFork => self.cooked_set_len(tsl, dos_type, new_len),
            Part::RsrcFork => Err(Error::NotSupported),
        }
    }

    fn next_data_or_hole(&self, r: Self::EntryRef, part: Part, from: u64, want_hole: bool) -> Result<Option<u64>> {
        if part != Part::RawData {
            return Ok(None);
        }
        let (tsl, _) = self.file_tsl_and_type(r)?;
        let chain = storage::load_chain(&self.store, tsl)?;
        let from_sector = (from / 256) as usize;
        Ok(storage::next_data_or_hole(&chain, from_sector, want_hole))
    }

    fn flush_descriptor(&mut self, r: Self::EntryRef, _part: Part) -> Result<()> {
        let DosEntryRef::File { track, sector, slot } = r else {
            return Ok(());
        };
        let mut info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
        let tsl = match &info.slots[slot as usize] {
            CatalogSlot::Used {
                tsl_track, tsl_sector, ..
            } => TsListAddr {
                track: *tsl_track,
                sector: *tsl_sector,
            },
            _ => return Ok(()),
        };
        let chain = storage::load_chain(&self.store, tsl)?;
        let data_sectors = chain.iter().flat_map(|(_, l)| l.pairs.iter()).filter(|p| !p.is_sparse()).count();
        let total = (chain.len() + data_sectors) as u16;
        if let CatalogSlot::Used { sector_count, .. } = &mut info.slots[slot as usize] {
            *sector_count = total;
        }
        self.store.write_sector(track as u32, sector as u32, &info.to_bytes())?;
        Ok(())
    }

    fn create(&mut self, parent: Self::EntryRef, name: &str, create_mode: CreateMode) -> Result<Self::EntryRef> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if parent != DosEntryRef::Root {
            return Err(Error::NotFound);
        }
        if create_mode == CreateMode::Directory {
            return Err(Error::NotSupported);
        }
        if name.is_empty() || name.len() > 30 {
            return Err(Error::InvalidName);
        }

        let addrs = self.catalog_addrs()?;
        let mut target = None;
        for &(t, s) in &addrs {
            let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(t, s)?);
            for (idx, slot) in info.slots.iter().enumerate() {
                match slot {
                    CatalogSlot::Used { raw_name, .. } if decode_name(raw_name).eq_ignore_ascii_case(name) => {
                        return Err(Error::Exists);
                    }
                    CatalogSlot::Unused | CatalogSlot::Deleted { .. } if target.is_none() => {
                        target = Some((t, s, idx as u8));
                    }
                    _ => {}
                }
            }
        }
        let (t, s, idx) = target.ok_or(Error::DiskFull)?;

        let chain_head = storage::alloc_empty_chain(&mut self.store, &mut self.vtoc)?;

        let mut info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(t, s)?);
        info.slots[idx as usize] = CatalogSlot::Used {
            tsl_track: chain_head.track,
            tsl_sector: chain_head.sector,
            locked: false,
            dos_type: DosType::TEXT,
            raw_name: encode_name(name),
            sector_count: 1,
        };
        self.store.write_sector(t as u32, s as u32, &info.to_bytes())?;

        Ok(DosEntryRef::File { track: t, sector: s, slot: idx })
    }

    fn delete(&mut self, r: Self::EntryRef) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let DosEntryRef::File { track, sector, slot } = r else {
            return Err(Error::InvalidMode);
        };
        let mut info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
        let (tsl_track, tsl_sector, raw_name) = match &info.slots[slot as usize] {
            CatalogSlot::Used {
                tsl_track,
                tsl_sector,
                raw_name,
                ..
            } => (*tsl_track, *tsl_sector, *raw_name),
            _ => return Err(Error::NotFound),
        };
        let mut chain = storage::load_chain(
            &self.store,
            TsListAddr {
                track: tsl_track,
                sector: tsl_sector,
            },
        )?;
        let mut first = TsListAddr {
            track: tsl_track,
            sector: tsl_sector,
        };
        storage::set_len(&mut self.store, &mut self.vtoc, &mut chain, &mut first, 0)?;
        info.slots[slot as usize] = CatalogSlot::Deleted { raw_name };
        self.store.write_sector(track as u32, sector as u32, &info.to_bytes())?;
        Ok(())
    }

    fn move_entry(&mut self, r: Self::EntryRef, new_parent: Self::EntryRef, new_name: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if new_parent != DosEntryRef::Root {
            return Err(Error::NotSupported);
        }
        if new_name.is_empty() || new_name.len() > 30 {
            return Err(Error::InvalidName);
        }
        let DosEntryRef::File { track, sector, slot } = r else {
            return Err(Error::InvalidMode);
        };

        for &(t, s) in &self.catalog_addrs()? {
            let info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(t, s)?);
            for (idx, existing) in info.slots.iter().enumerate() {
                if (t, s, idx as u8) == (track, sector, slot) {
                    continue;
                }
                if let CatalogSlot::Used { raw_name, .. } = existing {
                    if decode_name(raw_name).eq_ignore_ascii_case(new_name) {
                        return Err(Error::Exists);
                    }
                }
            }
        }

        let mut info = CatalogSectorInfo::from_bytes(&self.read_sector_raw(track, sector)?);
        match &mut info.slots[slot as usize] {
            CatalogSlot::Used { raw_name, .. } => *raw_name = encode_name(new_name),
            _ => return Err(Error::NotFound),
        }
        self.store.write_sector(track as u32, sector as u32, &info.to_bytes())?;
        Ok(())
    }

    fn add_rsrc_fork(&mut self, _r: Self::EntryRef) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// DOS 3.x has no volume-name field, so `name` is accepted and ignored
    /// (recorded as a design decision; `spec.md` leaves format's parameters
    /// generic across formats that do and don't have one). `num` becomes the
    /// VTOC volume number, clamped to DOS's 1..=254 range. `bootable`
    /// reserves tracks 0-2 from the free bitmap for boot code this
    /// implementation does not itself write.
    fn format(&mut self, name: &str, num: u32, bootable: bool) -> Result<()> {
        let _ = name;
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if !geometry::is_allowed(&self.store.geometry()) {
            return Err(Error::InvalidImage);
        }
        let (tracks, sectors) = match self.store.geometry() {
            Geometry::Sectored {
                tracks,
                sectors_per_track,
            } => (tracks, sectors_per_track),
            Geometry::Blocked { .. } => return Err(Error::InvalidImage),
        };

        let vtoc_track = self.vtoc_track;
        let mut vtoc = VtocInfo {
            catalog_track: vtoc_track,
            catalog_sector: (sectors - 1) as u8,
            dos_release: 3,
            volume: num.clamp(1, 254) as u8,
            max_ts_pairs: PAIRS_PER_SECTOR as u8,
            last_track: vtoc_track,
            last_direction: 1,
            tracks: tracks as u8,
            sectors: sectors as u8,
            bytes_per_sector: 256,
            bitmap: [0; MAX_TRACKS * 4],
            vtoc_track,
        };
        for t in 0..tracks as u8 {
            if t == vtoc_track || (bootable && t <= 2) {
                continue;
            }
            vtoc.mark_track(t, true);
        }
        self.store.write_sector(vtoc_track as u32, 0, &vtoc.to_bytes())?;

        for s in (1..sectors as u8).rev() {
            let mut info = CatalogSectorInfo::empty();
            if s > 1 {
                info.next_track = vtoc_track;
                info.next_sector = s - 1;
            }
            self.store.write_sector(vtoc_track as u32, s as u32, &info.to_bytes())?;
        }

        self.vtoc = vtoc;
        self.notes.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.store.write_sector(self.vtoc_track as u32, 0, &self.vtoc.to_bytes())?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.store.is_read_only() || self.access_level == AccessLevel::ReadOnly
    }

    fn set_access_level(&mut self, level: AccessLevel) {
        self.access_level = level;
    }

    fn notes(&self) -> &Notes {
        &self.notes
    }

    fn notes_mut(&mut self) -> &mut Notes {
        &mut self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paleofs_io::{MemStore, SectorOrdering};

    fn formatted() -> DosEngine<MemStore> {
        let store = MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        );
        let mut engine = DosEngine::blank(store);
        engine.format("IGNORED", 254, false).unwrap();
        engine
    }

    #[test]
    fn create_write_read_text_file_round_trips() {
        let mut engine = formatted();
        let r = engine.create(DosEntryRef::Root, "HELLO", CreateMode::File).unwrap();
        engine.write_at(r, Part::DataFork, 0, b"HI\x00THERE").unwrap();

        let mut buf = [0u8; 2];
        let n = engine.read_at(r, Part::DataFork, OpenMode::Rw, 0, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"HI");
        assert_eq!(engine.len_of(r, Part::DataFork, OpenMode::Rw).unwrap(), 2);
    }

    #[test]
    fn binary_header_tracks_cooked_length() {
        let mut engine = formatted();
        let r = engine.create(DosEntryRef::Root, "PROG", CreateMode::File).unwrap();
        if let DosEntryRef::File { track, sector, slot } = r {
            let mut info = CatalogSectorInfo::from_bytes(&engine.read_sector_raw(track, sector).unwrap());
            if let CatalogSlot::Used { dos_type, .. } = &mut info.slots[slot as usize] {
                *dos_type = DosType::BINARY;
            }
            engine.store.write_sector(track as u32, sector as u32, &info.to_bytes()).unwrap();
        }

        engine.write_at(r, Part::DataFork, 0, &[0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(engine.len_of(r, Part::DataFork, OpenMode::Rw).unwrap(), 3);

        let mut buf = [0u8; 3];
        engine.read_at(r, Part::DataFork, OpenMode::Rw, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xbb, 0xcc]);

        assert_eq!(engine.len_of(r, Part::RawData, OpenMode::Rw).unwrap(), 256);
    }

    #[test]
    fn delete_frees_chain_and_marks_slot_deleted() {
        let mut engine = formatted();
        let r = engine.create(DosEntryRef::Root, "GONE", CreateMode::File).unwrap();
        engine.write_at(r, Part::RawData, 0, &[1; 10]).unwrap();
        let free_before = engine.vtoc.count_free();

        engine.delete(r).unwrap();
        assert!(engine.vtoc.count_free() > free_before);
        assert!(engine.entry(r).is_err());
    }

    #[test]
    fn create_rejects_duplicate_name_case_insensitively() {
        let mut engine = formatted();
        engine.create(DosEntryRef::Root, "SAME", CreateMode::File).unwrap();
        assert_eq!(
            engine.create(DosEntryRef::Root, "same", CreateMode::File),
            Err(Error::Exists)
        );
    }

    #[test]
    fn scan_usage_marks_system_and_file_units() {
        let mut engine = formatted();
        let r = engine.create(DosEntryRef::Root, "X", CreateMode::File).unwrap();
        engine.write_at(r, Part::RawData, 0, &[1; 10]).unwrap();

        let usage = engine.scan_usage().unwrap();
        let (in_use, owner) = usage.get(unit(VTOC_TRACK, 0)).unwrap();
        assert!(in_use);
        assert_eq!(owner, Some(Owner::System));
    }

    fn shifted_store() -> MemStore {
        MemStore::new(
            vec![0u8; 35 * 16 * 256],
            Geometry::Sectored {
                tracks: 35,
                sectors_per_track: 16,
            },
            SectorOrdering::Dos,
        )
    }

    #[test]
    fn format_honors_an_overridden_vtoc_track() {
        let mut engine = DosEngine::blank_at(shifted_store(), 20);
        engine.format("SHIFTED", 254, false).unwrap();

        let mut engine = DosEngine::mount_at(engine.into_store(), 20).unwrap();
        let r = engine.create(DosEntryRef::Root, "HELLO", CreateMode::File).unwrap();
        engine.write_at(r, Part::DataFork, 0, b"HI").unwrap();
        let mut buf = [0u8; 2];
        engine.read_at(r, Part::DataFork, OpenMode::Rw, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"HI");
    }

    #[test]
    fn mounting_at_the_default_track_fails_when_the_vtoc_was_shifted() {
        let mut engine = DosEngine::blank_at(shifted_store(), 20);
        engine.format("SHIFTED", 254, false).unwrap();

        assert!(DosEngine::mount(engine.into_store()).is_err());
    }
}
