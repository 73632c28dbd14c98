//! Generic B*-tree over 512-byte nodes (`spec.md` §4.8), shared by the
//! catalog and extents-overflow trees. Node 0 is always the tree's `Header`
//! node; it also carries a simplified free-node bitmap in place of the
//! separate `Map` nodes real HFS uses (`DESIGN.md`).
//!
//! Keys and payloads are opaque byte strings; callers supply a comparator so
//! the same tree logic serves the catalog's Mac-Roman name ordering and the
//! extents tree's fixed numeric keys.

use std::cmp::Ordering;

use paleofs_core::Error;
use paleofs_io::ChunkStore;

use crate::storage::{BlockAllocator, ForkStorage, NoOverflow, OverflowExtents};
use crate::structures::node::{Node, NodeKind, RawRecord, NODE_SIZE, OFFSET_ENTRY_LEN};

const CHILD_LEN: usize = 4;

fn child_index(record: &RawRecord) -> u32 {
    u32::from_be_bytes(record.data[..CHILD_LEN].try_into().expect("4-byte child pointer"))
}

fn index_record(key: Vec<u8>, child: u32) -> RawRecord {
    RawRecord { key, data: child.to_be_bytes().to_vec() }
}

/// Picks the split point by walking cumulative record bytes plus each
/// record's 2-byte offset-table entry, targeting equal-size halves
/// (`spec.md` §4.8), rather than splitting by raw record count: catalog
/// leaves mix Dir/File/Thread records of very different sizes, and a
/// count-based split can leave one half far from half-full while the other
/// is still over `NODE_SIZE`. Always returns an index strictly between 0
/// and `records.len()` so both halves stay non-empty.
fn split_point(records: &[RawRecord]) -> usize {
    let sizes: Vec<usize> = records.iter().map(|r| r.encoded_len() + OFFSET_ENTRY_LEN).collect();
    let total: usize = sizes.iter().sum();
    let half = total / 2;
    let mut cumulative = 0;
    for (i, &size) in sizes.iter().enumerate() {
        if cumulative + size >= half && i > 0 {
            return i;
        }
        cumulative += size;
    }
    records.len() - 1
}

struct Meta {
    root: u32,
    total_nodes: u32,
    free: Vec<bool>,
}

impl Meta {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.free.len());
        out.extend_from_slice(&self.root.to_be_bytes());
        out.extend_from_slice(&self.total_nodes.to_be_bytes());
        out.extend(self.free.iter().map(|&f| if f { 1u8 } else { 0u8 }));
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let root = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let total_nodes = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let free = bytes[8..].iter().map(|&b| b != 0).collect();
        Meta { root, total_nodes, free }
    }
}

/// A B*-tree whose node file is `fork` (a [`ForkStorage`] over a tree file's
/// own direct extents; tree files never use the extents-overflow tree for
/// themselves, a simplification noted in `DESIGN.md`).
pub struct BTree<C> {
    pub fork: ForkStorage,
    cmp: C,
}

impl<C: Fn(&[u8], &[u8]) -> Ordering> BTree<C> {
    /// Formats a brand-new, empty tree: a Header node and a single empty
    /// Leaf root.
    pub fn format(
        store: &mut dyn ChunkStore,
        mut fork: ForkStorage,
        allocator: &mut dyn BlockAllocator,
        cmp: C,
    ) -> Result<Self, Error> {
        let abn = allocator.alloc_block()?;
        fork.extend(store, allocator, abn, &mut NoOverflow)?;
        let nodes_per_block = (fork.alloc_block_size_hint() as u64 / NODE_SIZE as u64).max(1) as u32;

        let meta = Meta { root: 1, total_nodes: nodes_per_block, free: vec![false; nodes_per_block as usize] };
        let mut tree = BTree { fork, cmp };
        tree.write_node(store, 0, &header_node(&meta))?;
        tree.write_node(store, 1, &Node::new(NodeKind::Leaf, 1))?;
        for i in 2..nodes_per_block {
            tree.mark_free_in_header(store, i as usize)?;
        }
        Ok(tree)
    }

    pub fn open(store: &dyn ChunkStore, fork: ForkStorage, cmp: C) -> Result<Self, Error> {
        let tree = BTree { fork, cmp };
        let _ = tree.read_node(store, 0)?;
        Ok(tree)
    }

    fn read_meta(&self, store: &dyn ChunkStore) -> Result<Meta, Error> {
        let node = self.read_node(store, 0)?;
        Ok(Meta::decode(&node.records[0].data))
    }

    fn write_meta(&self, store: &mut dyn ChunkStore, meta: &Meta) -> Result<(), Error> {
        self.write_node(store, 0, &header_node(meta))
    }

    fn mark_free_in_header(&self, store: &mut dyn ChunkStore, index: usize) -> Result<(), Error> {
        let mut meta = self.read_meta(store)?;
        if index >= meta.free.len() {
            meta.free.resize(index + 1, true);
        }
        meta.free[index] = true;
        self.write_meta(store, &meta)
    }

    fn read_node(&self, store: &dyn ChunkStore, index: u32) -> Result<Node, Error> {
        let mut bytes = [0u8; NODE_SIZE];
        self.fork.read_at(store, index as u64 * NODE_SIZE as u64, &mut bytes, &NoOverflow)?;
        Node::from_bytes(&bytes).ok_or(Error::Damaged)
    }

    fn write_node(&self, store: &mut dyn ChunkStore, index: u32, node: &Node) -> Result<(), Error> {
        self.fork.write_at(store, index as u64 * NODE_SIZE as u64, &node.to_bytes(), &NoOverflow)
    }

    fn alloc_node(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
    ) -> Result<u32, Error> {
        let mut meta = self.read_meta(store)?;
        if let Some(idx) = meta.free.iter().position(|&f| f) {
            meta.free[idx] = false;
            self.write_meta(store, &meta)?;
            return Ok(idx as u32);
        }
        let abn = allocator.alloc_block()?;
        self.fork.extend(store, allocator, abn, &mut NoOverflow)?;
        let nodes_per_block =
            (self.fork.alloc_block_size_hint() as u64 / NODE_SIZE as u64).max(1) as u32;
        let new_index = meta.total_nodes;
        meta.total_nodes += nodes_per_block;
        meta.free.resize(meta.total_nodes as usize, true);
        meta.free[new_index as usize] = false;
        self.write_meta(store, &meta)?;
        Ok(new_index)
    }

    fn free_node(&mut self, store: &mut dyn ChunkStore, index: u32) -> Result<(), Error> {
        self.mark_free_in_header(store, index as usize)
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }

    /// Descends from the root to the leaf that would contain `key`,
    /// returning the path of `(node_index, slot_chosen)` pairs and the leaf.
    fn descend(
        &self,
        store: &dyn ChunkStore,
        key: &[u8],
    ) -> Result<(Vec<(u32, usize)>, u32, Node), Error> {
        let meta = self.read_meta(store)?;
        let mut path = Vec::new();
        let mut index = meta.root;
        loop {
            let node = self.read_node(store, index)?;
            if node.kind == NodeKind::Leaf {
                return Ok((path, index, node));
            }
            let mut slot = 0usize;
            for (i, rec) in node.records.iter().enumerate() {
                if self.key_cmp(&rec.key, key) != Ordering::Greater {
                    slot = i;
                } else {
                    break;
                }
            }
            path.push((index, slot));
            index = child_index(&node.records[slot]);
        }
    }

    /// Finds the record for `key`, if any.
    pub fn find(&self, store: &dyn ChunkStore, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let (_, _, leaf) = self.descend(store, key)?;
        Ok(leaf
            .records
            .iter()
            .find(|r| self.key_cmp(&r.key, key) == Ordering::Equal)
            .map(|r| r.data.clone()))
    }

    /// Returns every leaf record with the given key prefix comparator match,
    /// in key order — used for catalog directory listings (all records
    /// sharing a `parent_cnid`).
    pub fn scan<F: FnMut(&[u8], &[u8]) -> bool>(
        &self,
        store: &dyn ChunkStore,
        start_key: &[u8],
        mut keep_going: F,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let (_, _, mut leaf) = self.descend(store, start_key)?;
        let mut out = Vec::new();
        loop {
            for rec in &leaf.records {
                if self.key_cmp(&rec.key, start_key) == Ordering::Less {
                    continue;
                }
                if !keep_going(&rec.key, &rec.data) {
                    return Ok(out);
                }
                out.push((rec.key.clone(), rec.data.clone()));
            }
            if leaf.fwd_link == 0 {
                break;
            }
            leaf = self.read_node(store, leaf.fwd_link)?;
        }
        Ok(out)
    }

    /// Inserts or replaces the record at `key`.
    pub fn insert(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        key: Vec<u8>,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        let (path, leaf_index, mut leaf) = self.descend(store, &key)?;

        if let Some(existing) = leaf.records.iter_mut().find(|r| self.key_cmp(&r.key, &key) == Ordering::Equal) {
            existing.data = data;
            self.write_node(store, leaf_index, &leaf)?;
            return Ok(());
        }

        let slot = leaf
            .records
            .iter()
            .position(|r| self.key_cmp(&r.key, &key) == Ordering::Greater)
            .unwrap_or(leaf.records.len());
        let record = RawRecord { key: key.clone(), data };

        if leaf.can_fit(&record) {
            leaf.records.insert(slot, record);
            let leftmost_changed = slot == 0;
            self.write_node(store, leaf_index, &leaf)?;
            if leftmost_changed {
                self.propagate_key_update(store, &path, leaf.records[0].key.clone())?;
            }
            return Ok(());
        }

        self.split_leaf_and_insert(store, allocator, leaf_index, leaf, path, slot, record)
    }

    fn split_leaf_and_insert(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        leaf_index: u32,
        mut leaf: Node,
        path: Vec<(u32, usize)>,
        slot: usize,
        record: RawRecord,
    ) -> Result<(), Error> {
        leaf.records.insert(slot, record);
        let mid = split_point(&leaf.records);
        let right_records: Vec<RawRecord> = leaf.records.split_off(mid);
        let left_leftmost = leaf.records[0].key.clone();
        let right_leftmost = right_records[0].key.clone();

        let new_index = self.alloc_node(store, allocator)?;
        let mut right_node = Node::new(NodeKind::Leaf, 1);
        right_node.records = right_records;
        right_node.fwd_link = leaf.fwd_link;
        right_node.back_link = leaf_index;
        leaf.fwd_link = new_index;

        if right_node.fwd_link != 0 {
            let mut next = self.read_node(store, right_node.fwd_link)?;
            next.back_link = new_index;
            self.write_node(store, right_node.fwd_link, &next)?;
        }

        self.write_node(store, leaf_index, &leaf)?;
        self.write_node(store, new_index, &right_node)?;

        self.propagate_key_update(store, &path, left_leftmost)?;
        self.insert_index_record(store, allocator, &path, right_leftmost, new_index)
    }

    /// Inserts a new index record keyed by `key` pointing at `child` into
    /// the parent named by the end of `path`; splits that parent (and
    /// possibly grows the root) if it overflows.
    fn insert_index_record(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        path: &[(u32, usize)],
        key: Vec<u8>,
        child: u32,
    ) -> Result<(), Error> {
        let Some((&(parent_index, _), rest)) = path.split_last() else {
            return self.grow_root(store, allocator, key, child);
        };

        let mut parent = self.read_node(store, parent_index)?;
        let slot = parent
            .records
            .iter()
            .position(|r| self.key_cmp(&r.key, &key) == Ordering::Greater)
            .unwrap_or(parent.records.len());
        let record = index_record(key, child);

        if parent.can_fit(&record) {
            parent.records.insert(slot, record);
            self.write_node(store, parent_index, &parent)?;
            return Ok(());
        }

        parent.records.insert(slot, record);
        let mid = split_point(&parent.records);
        let right_records = parent.records.split_off(mid);
        let right_leftmost = right_records[0].key.clone();

        let new_index = self.alloc_node(store, allocator)?;
        let mut right_node = Node::new(NodeKind::Index, parent.height);
        right_node.records = right_records;

        self.write_node(store, parent_index, &parent)?;
        self.write_node(store, new_index, &right_node)?;

        self.insert_index_record(store, allocator, rest, right_leftmost, new_index)
    }

    fn grow_root(
        &mut self,
        store: &mut dyn ChunkStore,
        allocator: &mut dyn BlockAllocator,
        right_key: Vec<u8>,
        right_child: u32,
    ) -> Result<(), Error> {
        let old_root_index = self.read_meta(store)?.root;
        let old_root = self.read_node(store, old_root_index)?;
        let left_leftmost = old_root.records.first().map(|r| r.key.clone()).unwrap_or_default();

        let new_root_index = self.alloc_node(store, allocator)?;
        let mut new_root = Node::new(NodeKind::Index, old_root.height + 1);
        new_root.records.push(index_record(left_leftmost, old_root_index));
        new_root.records.push(index_record(right_key, right_child));
        self.write_node(store, new_root_index, &new_root)?;

        let mut meta = self.read_meta(store)?;
        meta.root = new_root_index;
        self.write_meta(store, &meta)
    }

    /// Replaces the leftmost-key index entries along `path` with `new_key`,
    /// stopping as soon as a node's entry already matches (the usual case
    /// once you rise above the split point).
    fn propagate_key_update(
        &mut self,
        store: &mut dyn ChunkStore,
        path: &[(u32, usize)],
        new_key: Vec<u8>,
    ) -> Result<(), Error> {
        for &(node_index, slot) in path.iter().rev() {
            let mut node = self.read_node(store, node_index)?;
            if slot != 0 || node.records[slot].key == new_key {
                break;
            }
            node.records[slot].key = new_key.clone();
            self.write_node(store, node_index, &node)?;
        }
        Ok(())
    }

    /// Removes the record at `key`, merging an underflowing leaf into its
    /// left sibling when the combined size still fits (`spec.md` §4.8).
    pub fn delete(&mut self, store: &mut dyn ChunkStore, key: &[u8]) -> Result<bool, Error> {
        let (path, leaf_index, mut leaf) = self.descend(store, key)?;

        let Some(pos) = leaf.records.iter().position(|r| self.key_cmp(&r.key, key) == Ordering::Equal)
        else {
            return Ok(false);
        };
        leaf.records.remove(pos);

        if leaf.records.is_empty() {
            self.unlink_and_free_leaf(store, leaf_index, &leaf)?;
            if let Some((parent_index, _)) = path.last().copied() {
                self.remove_index_record(store, parent_index, leaf_index)?;
            }
            return Ok(true);
        }

        let replaced_leftmost = pos == 0;
        if replaced_leftmost {
            let new_key = leaf.records[0].key.clone();
            self.write_node(store, leaf_index, &leaf)?;
            self.propagate_key_update(store, &path, new_key)?;
        } else {
            self.write_node(store, leaf_index, &leaf)?;
        }

        if leaf.used_bytes() * 2 < NODE_SIZE && leaf.back_link != 0 {
            let mut left = self.read_node(store, leaf.back_link)?;
            if left.kind == NodeKind::Leaf && (left.used_bytes() + leaf.used_bytes()) * 4 < NODE_SIZE * 3 {
                left.records.extend(leaf.records.clone());
                left.fwd_link = leaf.fwd_link;
                let left_index = leaf.back_link;
                self.write_node(store, left_index, &left)?;
                if leaf.fwd_link != 0 {
                    let mut next = self.read_node(store, leaf.fwd_link)?;
                    next.back_link = left_index;
                    self.write_node(store, leaf.fwd_link, &next)?;
                }
                self.free_node(store, leaf_index)?;
                if let Some((parent_index, _)) = path.last().copied() {
                    self.remove_index_record(store, parent_index, leaf_index)?;
                }
            }
        }

        Ok(true)
    }

    fn unlink_and_free_leaf(&mut self, store: &mut dyn ChunkStore, index: u32, leaf: &Node) -> Result<(), Error> {
        if leaf.back_link != 0 {
            let mut left = self.read_node(store, leaf.back_link)?;
            left.fwd_link = leaf.fwd_link;
            self.write_node(store, leaf.back_link, &left)?;
        }
        if leaf.fwd_link != 0 {
            let mut right = self.read_node(store, leaf.fwd_link)?;
            right.back_link = leaf.back_link;
            self.write_node(store, leaf.fwd_link, &right)?;
        }
        self.free_node(store, index)
    }

    fn remove_index_record(&mut self, store: &mut dyn ChunkStore, parent_index: u32, child: u32) -> Result<(), Error> {
        let mut parent = self.read_node(store, parent_index)?;
        if let Some(pos) = parent.records.iter().position(|r| child_index(r) == child) {
            parent.records.remove(pos);
            self.write_node(store, parent_index, &parent)?;
        }
        Ok(())
    }
}

fn header_node(meta: &Meta) -> Node {
    let mut node = Node::new(NodeKind::Header, 0);
    node.records.push(RawRecord { key: vec![0], data: meta.encode() });
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{Fork, ExtDataRec, HFS_SIGNATURE, VolumeAttrs};
    use chrono::{TimeZone, Utc};
    use paleofs_common::{AllocMap, Owner};
    use paleofs_io::{Geometry, MemStore, SectorOrdering};

    struct TestAllocator<'a>(&'a mut AllocMap);
    impl BlockAllocator for TestAllocator<'_> {
        fn alloc_block(&mut self) -> Result<u32, Error> {
            Ok(self.0.alloc(Owner::System).map_err(|_| Error::DiskFull)? as u32)
        }
    }

    fn sample_mdb() -> crate::structures::MdbInfo {
        crate::structures::MdbInfo {
            signature: HFS_SIGNATURE,
            created: Utc.timestamp_opt(0, 0).single().unwrap(),
            modified: Utc.timestamp_opt(0, 0).single().unwrap(),
            attributes: VolumeAttrs::empty(),
            root_file_count: 0,
            bitmap_start: 3,
            alloc_search_ptr: 0,
            alloc_block_count: 4000,
            alloc_block_size: 512,
            default_clump_size: 512,
            alloc_block_start: 6,
            next_cnid: 16,
            free_blocks: 3999,
            volume_name: b"Test".to_vec(),
            backup_date: Utc.timestamp_opt(0, 0).single().unwrap(),
            backup_seq_num: 0,
            write_count: 0,
            extents_clump_size: 512,
            catalog_clump_size: 512,
            root_dir_count: 0,
            file_count: 0,
            dir_count: 0,
            finder_info: [0; 32],
            extents_file_size: 512,
            extents_first_extents: ExtDataRec::EMPTY,
            catalog_file_size: 512,
            catalog_first_extents: ExtDataRec::EMPTY,
        }
    }

    fn numeric_cmp(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn insert_find_and_split_across_many_records() {
        let mdb = sample_mdb();
        let mut store = MemStore::new(
            vec![0u8; 4096 * 512],
            Geometry::Blocked { block_count: 4096 },
            SectorOrdering::Physical,
        );
        let mut map = AllocMap::new(4000, 0);
        let mut allocator = TestAllocator(&mut map);

        let fork = ForkStorage::new(99, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut tree = BTree::format(&mut store, fork, &mut allocator, numeric_cmp).unwrap();

        for i in 0u32..300 {
            let key = i.to_be_bytes().to_vec();
            let data = (i * 2).to_be_bytes().to_vec();
            tree.insert(&mut store, &mut allocator, key, data).unwrap();
        }

        for i in 0u32..300 {
            let key = i.to_be_bytes().to_vec();
            let found = tree.find(&store, &key).unwrap();
            assert_eq!(found, Some((i * 2).to_be_bytes().to_vec()));
        }
    }

    #[test]
    fn split_point_balances_by_bytes_not_count() {
        // Mimics a catalog leaf mixing small Thread (46B) and large File
        // (90B) records: a count-based split (mid = len/2 = 5) would put
        // four Files and one Thread on one side and one File and four
        // Threads on the other, a far more skewed byte split than walking
        // cumulative size achieves.
        let records: Vec<RawRecord> = (0..10)
            .map(|i| {
                let data_len = if i % 2 == 0 { 90 } else { 46 };
                RawRecord { key: vec![i as u8], data: vec![0u8; data_len] }
            })
            .collect();
        let mid = split_point(&records);
        let left_bytes: usize = records[..mid].iter().map(|r| r.encoded_len() + OFFSET_ENTRY_LEN).sum();
        let right_bytes: usize = records[mid..].iter().map(|r| r.encoded_len() + OFFSET_ENTRY_LEN).sum();
        assert!(mid > 0 && mid < records.len());
        assert!(left_bytes.abs_diff(right_bytes) < 100);
    }

    #[test]
    fn splitting_mixed_size_records_never_overflows_a_node() {
        let mdb = sample_mdb();
        let mut store = MemStore::new(
            vec![0u8; 4096 * 512],
            Geometry::Blocked { block_count: 4096 },
            SectorOrdering::Physical,
        );
        let mut map = AllocMap::new(4000, 0);
        let mut allocator = TestAllocator(&mut map);
        let fork = ForkStorage::new(99, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut tree = BTree::format(&mut store, fork, &mut allocator, numeric_cmp).unwrap();

        // Alternate small (Thread-ish) and large (File-ish) payloads so a
        // leaf accumulates a skewed size mix before it has to split.
        for i in 0u32..80 {
            let data_len = if i % 3 == 0 { 90 } else { 20 };
            let key = i.to_be_bytes().to_vec();
            let data = vec![0xab; data_len];
            tree.insert(&mut store, &mut allocator, key, data).unwrap();
        }

        for i in 0u32..80 {
            let key = i.to_be_bytes().to_vec();
            let expected_len = if i % 3 == 0 { 90 } else { 20 };
            let found = tree.find(&store, &key).unwrap().unwrap();
            assert_eq!(found.len(), expected_len);
        }
    }

    #[test]
    fn delete_removes_record() {
        let mdb = sample_mdb();
        let mut store = MemStore::new(
            vec![0u8; 4096 * 512],
            Geometry::Blocked { block_count: 4096 },
            SectorOrdering::Physical,
        );
        let mut map = AllocMap::new(4000, 0);
        let mut allocator = TestAllocator(&mut map);
        let fork = ForkStorage::new(99, Fork::Data, ExtDataRec::EMPTY, &mdb);
        let mut tree = BTree::format(&mut store, fork, &mut allocator, numeric_cmp).unwrap();

        for i in 0u32..40 {
            tree.insert(&mut store, &mut allocator, i.to_be_bytes().to_vec(), vec![1]).unwrap();
        }
        assert!(tree.delete(&mut store, &20u32.to_be_bytes()).unwrap());
        assert_eq!(tree.find(&store, &20u32.to_be_bytes()).unwrap(), None);
        assert_eq!(tree.find(&store, &21u32.to_be_bytes()).unwrap(), Some(vec![1]));
    }
}
