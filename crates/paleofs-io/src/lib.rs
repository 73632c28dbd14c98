//! Block/sector-granular byte I/O over a vintage disk image.
//!
//! [`ChunkStore`] is the lowest layer of paleofs: it knows how to read and
//! write fixed-size chunks (256-byte sectors or 512-byte blocks) and nothing
//! about what a particular filesystem engine does with those bytes. Sector
//! *ordering* (how a `(track, sector)` pair maps to a linear byte offset) and
//! access gating live here too, since both are properties of the image, not
//! of any one format.

use thiserror::Error;

pub const SECTOR_SIZE: usize = 256;
pub const BLOCK_SIZE: usize = 512;

/// Failures surfaced by a [`ChunkStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The underlying medium reported an I/O failure on this chunk.
    #[error("bad block")]
    BadBlock,
    /// The requested chunk falls outside the image's geometry.
    #[error("chunk index out of range")]
    OutOfRange,
    /// The store's access gate denied this operation.
    #[error("access denied")]
    AccessDenied,
}

pub type Result<T> = core::result::Result<T, ChunkError>;

/// The geometry of an image: either a sectored (track, sector) disk or a
/// flat run of fixed-size blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// `tracks` tracks of `sectors_per_track` 256-byte sectors each.
    Sectored {
        tracks: u32,
        sectors_per_track: u32,
    },
    /// `block_count` 512-byte blocks.
    Blocked { block_count: u64 },
}

impl Geometry {
    pub fn byte_len(&self) -> u64 {
        match *self {
            Geometry::Sectored {
                tracks,
                sectors_per_track,
            } => tracks as u64 * sectors_per_track as u64 * SECTOR_SIZE as u64,
            Geometry::Blocked { block_count } => block_count * BLOCK_SIZE as u64,
        }
    }
}

/// The kind of chunk a [`ChunkRef`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Block,
    Sector,
}

/// A bounds-checked reference to a single chunk in a [`ChunkStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
    pub kind: ChunkKind,
    pub index: u64,
}

impl ChunkRef {
    pub fn block(index: u64) -> Self {
        Self {
            kind: ChunkKind::Block,
            index,
        }
    }

    pub fn sector(index: u64) -> Self {
        Self {
            kind: ChunkKind::Sector,
            index,
        }
    }
}

/// How `(track, sector)` addresses are interleaved onto linear sector
/// offsets within the image. Needed because the same logical DOS/ProDOS
/// volume can appear nibblized in more than one physical sector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOrdering {
    /// DOS 3.x's native physical-to-logical skew.
    Dos,
    /// ProDOS's native skew (also used for 512-byte block images).
    ProDos,
    /// CP/M's skew (distinct boot-track vs. data-track skew, see
    /// `spec.md` §9 Open Question b).
    Cpm,
    /// No skew: sector `n` is the `n`-th 256-byte run in the image.
    Physical,
}

impl SectorOrdering {
    /// DOS logical sector -> physical sector lookup table (16-sector format).
    const DOS_SKEW: [u8; 16] = [0, 13, 11, 9, 7, 5, 3, 1, 14, 12, 10, 8, 6, 4, 2, 15];
    /// ProDOS logical sector -> physical sector lookup table (16-sector format).
    const PRODOS_SKEW: [u8; 16] = [0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15];

    /// Maps a logical `(track, sector)` pair (sector counted in this
    /// ordering's own numbering) to a physical sector index within its track.
    fn physical_sector(&self, sector: u32, sectors_per_track: u32) -> u32 {
        match self {
            SectorOrdering::Physical | SectorOrdering::Cpm => sector,
            SectorOrdering::Dos if sectors_per_track == 16 => {
                Self::DOS_SKEW[sector as usize % 16] as u32
            }
            SectorOrdering::ProDos if sectors_per_track == 16 => {
                Self::PRODOS_SKEW[sector as usize % 16] as u32
            }
            _ => sector,
        }
    }
}

/// Contract for byte I/O over a vintage disk image.
///
/// A given `ChunkStore` is fixed to one [`SectorOrdering`] and one
/// [`Geometry`] for its lifetime; a different ordering over the same bytes is
/// a different store (see [`SubsetView`] for re-slicing).
pub trait ChunkStore {
    fn geometry(&self) -> Geometry;
    fn ordering(&self) -> SectorOrdering;
    fn len(&self) -> u64 {
        self.geometry().byte_len()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn is_read_only(&self) -> bool;

    fn read_block(&self, n: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()>;
    fn write_block(&mut self, n: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()>;

    fn read_sector(&self, track: u32, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()>;
    fn write_sector(&mut self, track: u32, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()>;

    /// Read an arbitrary byte range, used by engines that need to address
    /// bytes directly (e.g. HFS allocation blocks that are multiples of 512).
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let block = (offset + done as u64) / BLOCK_SIZE as u64;
            let in_block = ((offset + done as u64) % BLOCK_SIZE as u64) as usize;
            let mut tmp = [0u8; BLOCK_SIZE];
            self.read_block(block, &mut tmp)?;
            let n = (BLOCK_SIZE - in_block).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&tmp[in_block..in_block + n]);
            done += n;
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let block = (offset + done as u64) / BLOCK_SIZE as u64;
            let in_block = ((offset + done as u64) % BLOCK_SIZE as u64) as usize;
            let mut tmp = [0u8; BLOCK_SIZE];
            self.read_block(block, &mut tmp)?;
            let n = (BLOCK_SIZE - in_block).min(buf.len() - done);
            tmp[in_block..in_block + n].copy_from_slice(&buf[done..done + n]);
            self.write_block(block, &tmp)?;
            done += n;
        }
        Ok(())
    }
}

/// A [`ChunkStore`] backed by an in-memory byte buffer, addressed with a
/// fixed [`SectorOrdering`] and [`Geometry`].
pub struct MemStore {
    data: Vec<u8>,
    geometry: Geometry,
    ordering: SectorOrdering,
    read_only: bool,
}

impl MemStore {
    pub fn new(data: Vec<u8>, geometry: Geometry, ordering: SectorOrdering) -> Self {
        Self {
            data,
            geometry,
            ordering,
            read_only: false,
        }
    }

    pub fn read_only(mut self, ro: bool) -> Self {
        self.read_only = ro;
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn sectors_per_track(&self) -> Option<u32> {
        match self.geometry {
            Geometry::Sectored {
                sectors_per_track, ..
            } => Some(sectors_per_track),
            Geometry::Blocked { .. } => None,
        }
    }
}

impl ChunkStore for MemStore {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn ordering(&self) -> SectorOrdering {
        self.ordering
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_block(&self, n: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let offset = n as usize * BLOCK_SIZE;
        if offset + BLOCK_SIZE > self.data.len() {
            return Err(ChunkError::OutOfRange);
        }
        buf.copy_from_slice(&self.data[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, n: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if self.read_only {
            return Err(ChunkError::AccessDenied);
        }
        let offset = n as usize * BLOCK_SIZE;
        if offset + BLOCK_SIZE > self.data.len() {
            return Err(ChunkError::OutOfRange);
        }
        self.data[offset..offset + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn read_sector(&self, track: u32, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let spt = self.sectors_per_track().ok_or(ChunkError::OutOfRange)?;
        if sector >= spt {
            return Err(ChunkError::OutOfRange);
        }
        let phys = self.ordering.physical_sector(sector, spt);
        let offset = (track as usize * spt as usize + phys as usize) * SECTOR_SIZE;
        if offset + SECTOR_SIZE > self.data.len() {
            return Err(ChunkError::OutOfRange);
        }
        buf.copy_from_slice(&self.data[offset..offset + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&mut self, track: u32, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        if self.read_only {
            return Err(ChunkError::AccessDenied);
        }
        let spt = self.sectors_per_track().ok_or(ChunkError::OutOfRange)?;
        if sector >= spt {
            return Err(ChunkError::OutOfRange);
        }
        let phys = self.ordering.physical_sector(sector, spt);
        let offset = (track as usize * spt as usize + phys as usize) * SECTOR_SIZE;
        if offset + SECTOR_SIZE > self.data.len() {
            return Err(ChunkError::OutOfRange);
        }
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// Composes a parent store and an index-mapping function to expose a region
/// of the parent as an independent store. Used for embedded/hybrid volumes
/// (`spec.md` §4.10), where e.g. a DOS-MASTER volume's 400-block run needs to
/// present itself as a self-contained 400KB store to a nested `DosEngine`.
pub struct SubsetView<'a, S: ChunkStore> {
    parent: &'a mut S,
    geometry: Geometry,
    ordering: SectorOrdering,
    /// Maps a block index in this view to a block index in the parent.
    map_block: Box<dyn Fn(u64) -> u64 + 'a>,
}

impl<'a, S: ChunkStore> SubsetView<'a, S> {
    pub fn new(
        parent: &'a mut S,
        geometry: Geometry,
        ordering: SectorOrdering,
        map_block: impl Fn(u64) -> u64 + 'a,
    ) -> Self {
        Self {
            parent,
            geometry,
            ordering,
            map_block: Box::new(map_block),
        }
    }

    /// Convenience constructor for a contiguous run of blocks starting at
    /// `start_block`, the common case for embedded volumes.
    pub fn contiguous(
        parent: &'a mut S,
        start_block: u64,
        geometry: Geometry,
        ordering: SectorOrdering,
    ) -> Self {
        Self::new(parent, geometry, ordering, move |b| b + start_block)
    }
}

impl<S: ChunkStore> ChunkStore for SubsetView<'_, S> {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn ordering(&self) -> SectorOrdering {
        self.ordering
    }

    fn is_read_only(&self) -> bool {
        self.parent.is_read_only()
    }

    fn read_block(&self, n: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let block_count = self.len() / BLOCK_SIZE as u64;
        if n >= block_count {
            return Err(ChunkError::OutOfRange);
        }
        self.parent.read_block((self.map_block)(n), buf)
    }

    fn write_block(&mut self, n: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        let block_count = self.len() / BLOCK_SIZE as u64;
        if n >= block_count {
            return Err(ChunkError::OutOfRange);
        }
        self.parent.write_block((self.map_block)(n), buf)
    }

    fn read_sector(&self, track: u32, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let spt = match self.geometry {
            Geometry::Sectored {
                sectors_per_track, ..
            } => sectors_per_track,
            Geometry::Blocked { .. } => return Err(ChunkError::OutOfRange),
        };
        let linear = track as u64 * spt as u64 + sector as u64;
        let byte_off = linear * SECTOR_SIZE as u64;
        let mut tmp = buf.to_vec();
        self.read_bytes(byte_off, &mut tmp)?;
        buf.copy_from_slice(&tmp);
        Ok(())
    }

    fn write_sector(&mut self, track: u32, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        let spt = match self.geometry {
            Geometry::Sectored {
                sectors_per_track, ..
            } => sectors_per_track,
            Geometry::Blocked { .. } => return Err(ChunkError::OutOfRange),
        };
        let linear = track as u64 * spt as u64 + sector as u64;
        let byte_off = linear * SECTOR_SIZE as u64;
        self.write_bytes(byte_off, buf)
    }
}

/// The access level a [`GatedStore`] currently permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Closed,
    ReadOnly,
    Open,
}

/// Wraps a store with a mutable [`AccessLevel`] gate. `FsMount` uses this to
/// enforce `spec.md`'s `VolumeMount` state machine (§3): raw-vs-file-open
/// access, and read-only images, are rejected here rather than scattered
/// through every engine call site.
pub struct GatedStore<S: ChunkStore> {
    inner: S,
    level: AccessLevel,
}

impl<S: ChunkStore> GatedStore<S> {
    pub fn new(inner: S, level: AccessLevel) -> Self {
        Self { inner, level }
    }

    pub fn level(&self) -> AccessLevel {
        self.level
    }

    pub fn set_level(&mut self, level: AccessLevel) {
        self.level = level;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn check_read(&self) -> Result<()> {
        match self.level {
            AccessLevel::Closed => Err(ChunkError::AccessDenied),
            AccessLevel::ReadOnly | AccessLevel::Open => Ok(()),
        }
    }

    fn check_write(&self) -> Result<()> {
        match self.level {
            AccessLevel::Open => Ok(()),
            AccessLevel::Closed | AccessLevel::ReadOnly => Err(ChunkError::AccessDenied),
        }
    }
}

impl<S: ChunkStore> ChunkStore for GatedStore<S> {
    fn geometry(&self) -> Geometry {
        self.inner.geometry()
    }

    fn ordering(&self) -> SectorOrdering {
        self.inner.ordering()
    }

    fn is_read_only(&self) -> bool {
        self.level != AccessLevel::Open || self.inner.is_read_only()
    }

    fn read_block(&self, n: u64, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.check_read()?;
        self.inner.read_block(n, buf)
    }

    fn write_block(&mut self, n: u64, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.check_write()?;
        self.inner.write_block(n, buf)
    }

    fn read_sector(&self, track: u32, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        self.check_read()?;
        self.inner.read_sector(track, sector, buf)
    }

    fn write_sector(&mut self, track: u32, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        self.check_write()?;
        self.inner.write_sector(track, sector, buf)
    }
}
