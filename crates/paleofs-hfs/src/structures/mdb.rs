//! Master Directory Block (`spec.md` §4.8): signature, dates, allocation
//! geometry, and the two B*-tree headers, at logical block 2 (mirrored at
//! `last_block - 1`).

use chrono::{DateTime, TimeZone, Utc};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::extent::ExtDataRec;

/// `drSigWord` for a true HFS volume.
pub const HFS_SIGNATURE: u16 = 0x4244;
/// `drSigWord` for the MFS predecessor this crate also reads.
pub const MFS_SIGNATURE: u16 = 0xd2d7;

/// Seconds between the Mac epoch (1904-01-01) and the Unix epoch, used to
/// convert `drCrDate`/`drLsMod`/`drVolBkUp` to `chrono` timestamps.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

fn mac_to_utc(seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds as i64 - MAC_EPOCH_OFFSET, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
}

fn utc_to_mac(when: DateTime<Utc>) -> u32 {
    (when.timestamp() + MAC_EPOCH_OFFSET).clamp(0, u32::MAX as i64) as u32
}

pub const MDB_LEN: usize = 162;

#[repr(C, packed)]
#[derive(Clone, Copy, KnownLayout, Immutable, IntoBytes, FromBytes)]
struct RawMdb {
    sig_word: [u8; 2],
    cr_date: [u8; 4],
    ls_mod: [u8; 4],
    atrb: [u8; 2],
    nm_fls: [u8; 2],
    vbm_st: [u8; 2],
    alloc_ptr: [u8; 2],
    nm_al_blks: [u8; 2],
    al_blk_siz: [u8; 4],
    clp_siz: [u8; 4],
    al_bl_st: [u8; 2],
    nxt_cnid: [u8; 4],
    free_bks: [u8; 2],
    vn: [u8; 28],
    vol_bk_up: [u8; 4],
    v_seq_num: [u8; 2],
    wr_cnt: [u8; 4],
    xt_clp_siz: [u8; 4],
    ct_clp_siz: [u8; 4],
    nm_rt_dirs: [u8; 2],
    fil_cnt: [u8; 4],
    dir_cnt: [u8; 4],
    fndr_info: [u8; 32],
    vc_size: [u8; 2],
    vbm_c_size: [u8; 2],
    ctl_c_size: [u8; 2],
    xt_fl_size: [u8; 4],
    xt_ext_rec: [u8; 12],
    ct_fl_size: [u8; 4],
    ct_ext_rec: [u8; 12],
}

bitflags::bitflags! {
    /// `drAtrb` volume attribute bits we act on; the rest round-trip opaque.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeAttrs: u16 {
        const HARDWARE_LOCKED = 1 << 7;
        const VOLUME_DIRTY = 1 << 8;
        const SOFTWARE_LOCKED = 1 << 15;
    }
}

/// Owned, native-typed Master Directory Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdbInfo {
    pub signature: u16,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub attributes: VolumeAttrs,
    pub root_file_count: u16,
    pub bitmap_start: u16,
    pub alloc_search_ptr: u16,
    pub alloc_block_count: u16,
    pub alloc_block_size: u32,
    pub default_clump_size: u32,
    pub alloc_block_start: u16,
    pub next_cnid: u32,
    pub free_blocks: u16,
    /// Pascal-string volume name, raw Mac OS Roman bytes (`spec.md` §4.8
    /// leaves text encoding unspecified; names round-trip as opaque bytes
    /// the same way `paleofs-dos` keeps `raw_name`).
    pub volume_name: Vec<u8>,
    pub backup_date: DateTime<Utc>,
    pub backup_seq_num: u16,
    pub write_count: u32,
    pub extents_clump_size: u32,
    pub catalog_clump_size: u32,
    pub root_dir_count: u16,
    pub file_count: u32,
    pub dir_count: u32,
    pub finder_info: [u8; 32],
    pub extents_file_size: u32,
    pub extents_first_extents: ExtDataRec,
    pub catalog_file_size: u32,
    pub catalog_first_extents: ExtDataRec,
}

impl MdbInfo {
    pub fn is_hfs(&self) -> bool {
        self.signature == HFS_SIGNATURE
    }

    /// Allocation block index (0-based, `>= 2` on disk) holding `offset`
    /// bytes into the volume's allocation-block space.
    pub fn alloc_block_for_byte(&self, offset: u64) -> u32 {
        (offset / self.alloc_block_size as u64) as u32
    }

    /// Logical block number of allocation block `abn`.
    pub fn logical_block_of(&self, abn: u32) -> u64 {
        let blocks_per_alloc = self.alloc_block_size / 512;
        self.alloc_block_start as u64 + abn as u64 * blocks_per_alloc as u64
    }

    pub fn from_bytes(bytes: &[u8; MDB_LEN]) -> Self {
        let raw = RawMdb::read_from_bytes(bytes.as_slice()).expect("162-byte MDB");
        let name_len = raw.vn[0].min(27) as usize;
        let volume_name = raw.vn[1..1 + name_len].to_vec();
        MdbInfo {
            signature: u16::from_be_bytes(raw.sig_word),
            created: mac_to_utc(u32::from_be_bytes(raw.cr_date)),
            modified: mac_to_utc(u32::from_be_bytes(raw.ls_mod)),
            attributes: VolumeAttrs::from_bits_truncate(u16::from_be_bytes(raw.atrb)),
            root_file_count: u16::from_be_bytes(raw.nm_fls),
            bitmap_start: u16::from_be_bytes(raw.vbm_st),
            alloc_search_ptr: u16::from_be_bytes(raw.alloc_ptr),
            alloc_block_count: u16::from_be_bytes(raw.nm_al_blks),
            alloc_block_size: u32::from_be_bytes(raw.al_blk_siz),
            default_clump_size: u32::from_be_bytes(raw.clp_siz),
            alloc_block_start: u16::from_be_bytes(raw.al_bl_st),
            next_cnid: u32::from_be_bytes(raw.nxt_cnid),
            free_blocks: u16::from_be_bytes(raw.free_bks),
            volume_name,
            backup_date: mac_to_utc(u32::from_be_bytes(raw.vol_bk_up)),
            backup_seq_num: u16::from_be_bytes(raw.v_seq_num),
            write_count: u32::from_be_bytes(raw.wr_cnt),
            extents_clump_size: u32::from_be_bytes(raw.xt_clp_siz),
            catalog_clump_size: u32::from_be_bytes(raw.ct_clp_siz),
            root_dir_count: u16::from_be_bytes(raw.nm_rt_dirs),
            file_count: u32::from_be_bytes(raw.fil_cnt),
            dir_count: u32::from_be_bytes(raw.dir_cnt),
            finder_info: raw.fndr_info,
            extents_file_size: u32::from_be_bytes(raw.xt_fl_size),
            extents_first_extents: ExtDataRec::from_bytes(&raw.xt_ext_rec),
            catalog_file_size: u32::from_be_bytes(raw.ct_fl_size),
            catalog_first_extents: ExtDataRec::from_bytes(&raw.ct_ext_rec),
        }
    }

    pub fn to_bytes(&self) -> [u8; MDB_LEN] {
        let name_len = self.volume_name.len().min(27);
        let mut vn = [0u8; 28];
        vn[0] = name_len as u8;
        vn[1..1 + name_len].copy_from_slice(&self.volume_name[..name_len]);

        let raw = RawMdb {
            sig_word: self.signature.to_be_bytes(),
            cr_date: utc_to_mac(self.created).to_be_bytes(),
            ls_mod: utc_to_mac(self.modified).to_be_bytes(),
            atrb: self.attributes.bits().to_be_bytes(),
            nm_fls: self.root_file_count.to_be_bytes(),
            vbm_st: self.bitmap_start.to_be_bytes(),
            alloc_ptr: self.alloc_search_ptr.to_be_bytes(),
            nm_al_blks: self.alloc_block_count.to_be_bytes(),
            al_blk_siz: self.alloc_block_size.to_be_bytes(),
            clp_siz: self.default_clump_size.to_be_bytes(),
            al_bl_st: self.alloc_block_start.to_be_bytes(),
            nxt_cnid: self.next_cnid.to_be_bytes(),
            free_bks: self.free_blocks.to_be_bytes(),
            vn,
            vol_bk_up: utc_to_mac(self.backup_date).to_be_bytes(),
            v_seq_num: self.backup_seq_num.to_be_bytes(),
            wr_cnt: self.write_count.to_be_bytes(),
            xt_clp_siz: self.extents_clump_size.to_be_bytes(),
            ct_clp_siz: self.catalog_clump_size.to_be_bytes(),
            nm_rt_dirs: self.root_dir_count.to_be_bytes(),
            fil_cnt: self.file_count.to_be_bytes(),
            dir_cnt: self.dir_count.to_be_bytes(),
            fndr_info: self.finder_info,
            vc_size: [0; 2],
            vbm_c_size: [0; 2],
            ctl_c_size: [0; 2],
            xt_fl_size: self.extents_file_size.to_be_bytes(),
            xt_ext_rec: self.extents_first_extents.to_bytes(),
            ct_fl_size: self.catalog_file_size.to_be_bytes(),
            ct_ext_rec: self.catalog_first_extents.to_bytes(),
        };
        let mut out = [0u8; MDB_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MdbInfo {
        MdbInfo {
            signature: HFS_SIGNATURE,
            created: Utc.timestamp_opt(0, 0).single().unwrap(),
            modified: Utc.timestamp_opt(0, 0).single().unwrap(),
            attributes: VolumeAttrs::empty(),
            root_file_count: 0,
            bitmap_start: 3,
            alloc_search_ptr: 0,
            alloc_block_count: 100,
            alloc_block_size: 1024,
            default_clump_size: 1024 * 4,
            alloc_block_start: 6,
            next_cnid: 16,
            free_blocks: 90,
            volume_name: b"Untitled".to_vec(),
            backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
            backup_seq_num: 0,
            write_count: 0,
            extents_clump_size: 1024 * 4,
            catalog_clump_size: 1024 * 4,
            root_dir_count: 0,
            file_count: 0,
            dir_count: 0,
            finder_info: [0; 32],
            extents_file_size: 1024,
            extents_first_extents: ExtDataRec::EMPTY,
            catalog_file_size: 1024,
            catalog_first_extents: ExtDataRec::EMPTY,
        }
    }

    #[test]
    fn mdb_round_trips_through_bytes() {
        let mdb = sample();
        let bytes = mdb.to_bytes();
        let back = MdbInfo::from_bytes(&bytes);
        assert_eq!(back, mdb);
        assert!(back.is_hfs());
    }

    #[test]
    fn alloc_block_addressing_matches_block_start_and_size() {
        let mdb = sample();
        assert_eq!(mdb.logical_block_of(0), 6);
        assert_eq!(mdb.alloc_block_size / 512, 2);
        assert_eq!(mdb.logical_block_of(1), 8);
        assert_eq!(mdb.alloc_block_for_byte(1025), 1);
    }
}
