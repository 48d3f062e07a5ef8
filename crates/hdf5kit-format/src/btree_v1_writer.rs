//! Building v1 B-trees for groups and chunked datasets.
//!
//! Entries are inserted into an in-memory tree that splits a node in half
//! as soon as it exceeds its capacity (`2K` children, or `2 * leaf_k`
//! symbol-table entries). The finished tree is laid out through a caller
//! supplied allocator that maps a byte size to a file address.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String, vec, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use crate::btree_v1::{BTreeV1Key, BTreeV1Node, ChunkKey, ChunkRecord, KeyLayout};
use crate::error::FormatError;
use crate::local_heap::{LocalHeap, LocalHeapWriter};
use crate::property_list::{BTreeProps, HeapProps};
use crate::symbol_table::{SymbolTableEntry, SymbolTableMessage, SymbolTableNode};

enum MemNode<T> {
    /// Level-0 payload: one symbol-table node, or one chunk.
    Bucket(Vec<T>),
    Branch { level: u8, children: Vec<MemNode<T>> },
}

impl<T> MemNode<T> {
    fn first_item(&self) -> Option<&T> {
        match self {
            MemNode::Bucket(items) => items.first(),
            MemNode::Branch { children, .. } => children.first().and_then(MemNode::first_item),
        }
    }

    fn last_item(&self) -> Option<&T> {
        match self {
            MemNode::Bucket(items) => items.last(),
            MemNode::Branch { children, .. } => children.last().and_then(MemNode::last_item),
        }
    }
}

/// Items stored in a tree, ordered by their key.
trait Indexed {
    type Key: Ord;
    fn key(&self) -> Self::Key;
}

struct MemTree<T> {
    root: MemNode<T>,
    bucket_cap: usize,
    node_cap: usize,
    len: usize,
}

impl<T: Indexed> MemTree<T> {
    fn new(bucket_cap: usize, node_cap: usize) -> Self {
        Self {
            root: MemNode::Branch {
                level: 0,
                children: Vec::new(),
            },
            bucket_cap: bucket_cap.max(1),
            node_cap: node_cap.max(2),
            len: 0,
        }
    }

    /// Insert `item`; an item with an equal key is replaced when `replace`
    /// is set, otherwise it is handed back.
    fn insert(&mut self, item: T, replace: bool) -> Result<(), T> {
        if let MemNode::Branch { children, .. } = &mut self.root {
            if children.is_empty() {
                children.push(MemNode::Bucket(vec![item]));
                self.len += 1;
                return Ok(());
            }
        }
        let (bucket_cap, node_cap) = (self.bucket_cap, self.node_cap);
        let (sibling, added) = Self::insert_into(&mut self.root, item, replace, bucket_cap, node_cap)?;
        if added {
            self.len += 1;
        }
        if let Some(sibling) = sibling {
            let level = match &self.root {
                MemNode::Branch { level, .. } => *level + 1,
                MemNode::Bucket(_) => 0,
            };
            let left = core::mem::replace(
                &mut self.root,
                MemNode::Branch {
                    level,
                    children: Vec::new(),
                },
            );
            if let MemNode::Branch { children, .. } = &mut self.root {
                children.push(left);
                children.push(sibling);
            }
        }
        Ok(())
    }

    /// Returns the split-off right sibling, if any, and whether the item
    /// was new.
    fn insert_into(
        node: &mut MemNode<T>,
        item: T,
        replace: bool,
        bucket_cap: usize,
        node_cap: usize,
    ) -> Result<(Option<MemNode<T>>, bool), T> {
        match node {
            MemNode::Bucket(items) => {
                let key = item.key();
                let added = match items.binary_search_by(|x| x.key().cmp(&key)) {
                    Ok(pos) if replace => {
                        items[pos] = item;
                        false
                    }
                    Ok(_) => return Err(item),
                    Err(pos) => {
                        items.insert(pos, item);
                        true
                    }
                };
                if items.len() > bucket_cap {
                    let right = items.split_off(items.len() / 2);
                    return Ok((Some(MemNode::Bucket(right)), added));
                }
                Ok((None, added))
            }
            MemNode::Branch { level, children } => {
                let key = item.key();
                let idx = children
                    .iter()
                    .rposition(|c| c.first_item().is_some_and(|f| f.key() <= key))
                    .unwrap_or(0);
                let (sibling, added) =
                    Self::insert_into(&mut children[idx], item, replace, bucket_cap, node_cap)?;
                if let Some(sibling) = sibling {
                    children.insert(idx + 1, sibling);
                }
                if children.len() > node_cap {
                    let right = children.split_off(children.len() / 2);
                    return Ok((
                        Some(MemNode::Branch {
                            level: *level,
                            children: right,
                        }),
                        added,
                    ));
                }
                Ok((None, added))
            }
        }
    }
}

/// How a flavor of tree turns buckets and boundaries into bytes.
trait Flavor {
    type Item: Indexed;
    fn layout(&self) -> KeyLayout;
    fn k(&self) -> u16;
    /// Size of the on-disk node a bucket becomes, or `None` when a bucket
    /// is addressed directly.
    fn bucket_size(&self) -> Option<usize>;
    fn serialize_bucket(&self, items: &[Self::Item]) -> Result<Vec<u8>, FormatError>;
    /// Child pointer for a bucket placed at `address` (if it was placed).
    fn bucket_pointer(&self, items: &[Self::Item], address: Option<u64>) -> u64;
    /// Key separating a child from its right neighbour.
    fn right_key(&self, last: &Self::Item) -> BTreeV1Key;
    /// Key opening a child, when keys are left-bounded.
    fn left_key(&self, first: &Self::Item) -> Option<BTreeV1Key>;
    fn empty_key(&self) -> BTreeV1Key;
}

/// Serialized tree nodes and the root address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeImage {
    pub root_address: u64,
    /// `(address, bytes)` for every node, root last.
    pub nodes: Vec<(u64, Vec<u8>)>,
}

struct Placement {
    /// Address per branch node and placed bucket, in pre-order.
    addresses: Vec<u64>,
    /// Branch addresses per level, left to right.
    rows: BTreeMap<u8, Vec<u64>>,
}

fn place<F: Flavor, A: FnMut(u64) -> u64>(
    flavor: &F,
    node: &MemNode<F::Item>,
    alloc: &mut A,
    out: &mut Placement,
) {
    match node {
        MemNode::Bucket(_) => {
            if let Some(size) = flavor.bucket_size() {
                out.addresses.push(alloc(size as u64));
            }
        }
        MemNode::Branch { level, children } => {
            let address = alloc(node_size(flavor) as u64);
            out.addresses.push(address);
            out.rows.entry(*level).or_default().push(address);
            for child in children {
                place(flavor, child, alloc, out);
            }
        }
    }
}

fn node_size<F: Flavor>(flavor: &F) -> usize {
    BTreeV1Node::encoded_size(flavor.k(), OFFSET_SIZE, flavor.layout())
}

/// Trees are always written with 8-byte addresses.
const OFFSET_SIZE: u8 = 8;

struct Emitter<'p> {
    placement: &'p Placement,
    cursor: usize,
    row_pos: BTreeMap<u8, usize>,
    nodes: Vec<(u64, Vec<u8>)>,
}

impl Emitter<'_> {
    /// Emit `node` and return its child pointer.
    fn emit<F: Flavor>(
        &mut self,
        flavor: &F,
        node: &MemNode<F::Item>,
        prev_right: Option<BTreeV1Key>,
    ) -> Result<u64, FormatError> {
        match node {
            MemNode::Bucket(items) => {
                let address = match flavor.bucket_size() {
                    Some(_) => {
                        let a = self.placement.addresses[self.cursor];
                        self.cursor += 1;
                        self.nodes.push((a, flavor.serialize_bucket(items)?));
                        Some(a)
                    }
                    None => None,
                };
                Ok(flavor.bucket_pointer(items, address))
            }
            MemNode::Branch { level, children } => {
                let address = self.placement.addresses[self.cursor];
                self.cursor += 1;
                let pos = self.row_pos.entry(*level).or_insert(0);
                let row = &self.placement.rows[level];
                let left_sibling = pos.checked_sub(1).map(|p| row[p]);
                let right_sibling = row.get(*pos + 1).copied();
                *pos += 1;

                let mut keys = Vec::with_capacity(children.len() + 1);
                let mut pointers = Vec::with_capacity(children.len());
                let mut boundary = prev_right.unwrap_or_else(|| flavor.empty_key());
                for child in children {
                    let left = child
                        .first_item()
                        .and_then(|f| flavor.left_key(f))
                        .unwrap_or_else(|| boundary.clone());
                    keys.push(left);
                    pointers.push(self.emit(flavor, child, Some(boundary.clone()))?);
                    if let Some(last) = child.last_item() {
                        boundary = flavor.right_key(last);
                    }
                }
                keys.push(boundary);

                let tree_node = BTreeV1Node {
                    node_type: flavor.layout().node_type(),
                    node_level: *level,
                    left_sibling,
                    right_sibling,
                    keys,
                    children: pointers,
                };
                self.nodes
                    .push((address, tree_node.serialize(flavor.k(), OFFSET_SIZE, flavor.layout())?));
                Ok(address)
            }
        }
    }
}

fn write_tree<F: Flavor, A: FnMut(u64) -> u64>(
    flavor: &F,
    tree: &MemTree<F::Item>,
    alloc: &mut A,
) -> Result<TreeImage, FormatError> {
    let mut placement = Placement {
        addresses: Vec::new(),
        rows: BTreeMap::new(),
    };
    place(flavor, &tree.root, alloc, &mut placement);
    let mut emitter = Emitter {
        placement: &placement,
        cursor: 0,
        row_pos: BTreeMap::new(),
        nodes: Vec::new(),
    };
    let root_address = emitter.emit(flavor, &tree.root, None)?;
    Ok(TreeImage {
        root_address,
        nodes: emitter.nodes,
    })
}

struct GroupMember {
    name: String,
    entry: SymbolTableEntry,
}

impl Indexed for GroupMember {
    type Key = String;
    fn key(&self) -> String {
        self.name.clone()
    }
}

struct GroupFlavor {
    leaf_k: u16,
    internal_k: u16,
    length_size: u8,
}

impl Flavor for GroupFlavor {
    type Item = GroupMember;

    fn layout(&self) -> KeyLayout {
        KeyLayout::Group {
            length_size: self.length_size,
        }
    }

    fn k(&self) -> u16 {
        self.internal_k
    }

    fn bucket_size(&self) -> Option<usize> {
        Some(SymbolTableNode::encoded_size(self.leaf_k, OFFSET_SIZE))
    }

    fn serialize_bucket(&self, items: &[GroupMember]) -> Result<Vec<u8>, FormatError> {
        SymbolTableNode {
            entries: items.iter().map(|m| m.entry.clone()).collect(),
        }
        .serialize(self.leaf_k, OFFSET_SIZE)
    }

    fn bucket_pointer(&self, _items: &[GroupMember], address: Option<u64>) -> u64 {
        address.unwrap_or(crate::bytes::UNDEFINED_ADDRESS)
    }

    fn right_key(&self, last: &GroupMember) -> BTreeV1Key {
        BTreeV1Key::Group(last.entry.link_name_offset)
    }

    fn left_key(&self, _first: &GroupMember) -> Option<BTreeV1Key> {
        None
    }

    fn empty_key(&self) -> BTreeV1Key {
        BTreeV1Key::Group(0)
    }
}

/// Everything needed to write a v1 group: its symbol table message and the
/// tree, symbol-table and local-heap blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupImage {
    pub symbol_table: SymbolTableMessage,
    /// `(address, bytes)` for every block, including the local heap.
    pub blocks: Vec<(u64, Vec<u8>)>,
}

/// Builds the name index of a symbol-table group.
pub struct GroupTreeBuilder {
    tree: MemTree<GroupMember>,
    heap: LocalHeapWriter,
    flavor: GroupFlavor,
}

impl GroupTreeBuilder {
    pub fn new(btree: &BTreeProps, heap: &HeapProps) -> Self {
        Self {
            tree: MemTree::new(2 * btree.group_leaf_k as usize, 2 * btree.group_internal_k as usize),
            heap: LocalHeapWriter::new(heap.local_heap_initial_size, OFFSET_SIZE, heap.length_size),
            flavor: GroupFlavor {
                leaf_k: btree.group_leaf_k,
                internal_k: btree.group_internal_k,
                length_size: heap.length_size,
            },
        }
    }

    /// Add a hard link `name` to the object header at `address`.
    pub fn insert(&mut self, name: &str, address: u64) -> Result<(), FormatError> {
        self.insert_entry(name, |offset| SymbolTableEntry::new(offset, address))
    }

    /// Add a subgroup, caching its symbol table message in the entry.
    pub fn insert_group(
        &mut self,
        name: &str,
        address: u64,
        stab: &SymbolTableMessage,
    ) -> Result<(), FormatError> {
        self.insert_entry(name, |offset| SymbolTableEntry::group(offset, address, stab))
    }

    fn insert_entry<E>(&mut self, name: &str, entry: E) -> Result<(), FormatError>
    where
        E: FnOnce(u64) -> SymbolTableEntry,
    {
        if name.is_empty() {
            return Err(FormatError::PathNotFound(String::new()));
        }
        let offset = self.heap.add_name(name)?;
        let member = GroupMember {
            name: name.into(),
            entry: entry(offset),
        };
        match self.tree.insert(member, false) {
            Ok(()) => Ok(()),
            Err(dup) => {
                self.heap.remove_name(offset)?;
                Err(FormatError::DuplicateLink(dup.name))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len == 0
    }

    /// Lay out the tree, its symbol-table nodes and the local heap.
    pub fn finish<A: FnMut(u64) -> u64>(self, mut alloc: A) -> Result<GroupImage, FormatError> {
        let image = write_tree(&self.flavor, &self.tree, &mut alloc)?;
        let header_len = LocalHeap::header_size(OFFSET_SIZE, self.flavor.length_size) as u64;
        let heap_bytes_len = header_len + self.heap.data_segment_size();
        let heap_address = alloc(heap_bytes_len);
        let mut blocks = image.nodes;
        blocks.push((heap_address, self.heap.serialize(heap_address)));
        log::debug!(
            "group tree: {} members, root @{:#x}, {} blocks",
            self.tree.len,
            image.root_address,
            blocks.len()
        );
        Ok(GroupImage {
            symbol_table: SymbolTableMessage {
                btree_address: image.root_address,
                local_heap_address: heap_address,
            },
            blocks,
        })
    }
}

impl Indexed for ChunkRecord {
    type Key = Vec<u64>;
    fn key(&self) -> Vec<u64> {
        self.offsets.clone()
    }
}

struct ChunkFlavor {
    k: u16,
    chunk_dims: Vec<u64>,
}

impl ChunkFlavor {
    fn key_for(&self, offsets: &[u64], size: u32, filter_mask: u32) -> BTreeV1Key {
        let mut offsets = offsets.to_vec();
        offsets.push(0);
        BTreeV1Key::Chunk(ChunkKey {
            chunk_size: size,
            filter_mask,
            offsets,
        })
    }
}

impl Flavor for ChunkFlavor {
    type Item = ChunkRecord;

    fn layout(&self) -> KeyLayout {
        KeyLayout::Chunk {
            rank: self.chunk_dims.len(),
        }
    }

    fn k(&self) -> u16 {
        self.k
    }

    fn bucket_size(&self) -> Option<usize> {
        None
    }

    fn serialize_bucket(&self, _items: &[ChunkRecord]) -> Result<Vec<u8>, FormatError> {
        Ok(Vec::new())
    }

    fn bucket_pointer(&self, items: &[ChunkRecord], _address: Option<u64>) -> u64 {
        items.first().map_or(crate::bytes::UNDEFINED_ADDRESS, |c| c.address)
    }

    fn right_key(&self, last: &ChunkRecord) -> BTreeV1Key {
        let end: Vec<u64> = last
            .offsets
            .iter()
            .zip(&self.chunk_dims)
            .map(|(o, d)| o.saturating_add(*d))
            .collect();
        self.key_for(&end, 0, 0)
    }

    fn left_key(&self, first: &ChunkRecord) -> Option<BTreeV1Key> {
        Some(self.key_for(&first.offsets, first.size, first.filter_mask))
    }

    fn empty_key(&self) -> BTreeV1Key {
        self.key_for(&vec![0; self.chunk_dims.len()], 0, 0)
    }
}

/// Builds the chunk index of a chunked dataset.
pub struct ChunkTreeBuilder {
    tree: MemTree<ChunkRecord>,
    flavor: ChunkFlavor,
}

impl ChunkTreeBuilder {
    pub fn new(chunk_dims: &[u64], props: &BTreeProps) -> Self {
        Self {
            tree: MemTree::new(1, 2 * props.chunk_k as usize),
            flavor: ChunkFlavor {
                k: props.chunk_k,
                chunk_dims: chunk_dims.to_vec(),
            },
        }
    }

    /// Record a stored chunk; a chunk at the same origin is replaced.
    pub fn insert(&mut self, chunk: ChunkRecord) -> Result<(), FormatError> {
        if chunk.offsets.len() != self.flavor.chunk_dims.len() {
            return Err(FormatError::ElementCountMismatch {
                expected: self.flavor.chunk_dims.len(),
                actual: chunk.offsets.len(),
            });
        }
        if chunk
            .offsets
            .iter()
            .zip(&self.flavor.chunk_dims)
            .any(|(o, d)| *d == 0 || o % d != 0)
        {
            return Err(FormatError::ValueOutOfRange);
        }
        // replacement never hands the item back
        let _ = self.tree.insert(chunk, true);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len == 0
    }

    pub fn finish<A: FnMut(u64) -> u64>(self, mut alloc: A) -> Result<TreeImage, FormatError> {
        write_tree(&self.flavor, &self.tree, &mut alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree_v1::{collect_chunks, find_chunk, iterate_group, leaf_chain, lookup_group_entry};

    /// Bump allocator over a growing file image.
    fn bump(start: u64) -> impl FnMut(u64) -> u64 {
        let mut next = start;
        move |size| {
            let a = next;
            next += size;
            a
        }
    }

    fn materialize(blocks: &[(u64, Vec<u8>)]) -> Vec<u8> {
        let mut file = Vec::new();
        for (address, bytes) in blocks {
            let at = *address as usize;
            if file.len() < at + bytes.len() {
                file.resize(at + bytes.len(), 0);
            }
            file[at..at + bytes.len()].copy_from_slice(bytes);
        }
        file
    }

    fn small_props() -> BTreeProps {
        BTreeProps::new().group_leaf_k(2).group_internal_k(2)
    }

    #[test]
    fn group_tree_splits_and_resolves() {
        let mut builder = GroupTreeBuilder::new(&small_props(), &HeapProps::default());
        let names: Vec<String> = (0..40).map(|i| format!("member_{:03}", (i * 17) % 40)).collect();
        for (i, name) in names.iter().enumerate() {
            builder.insert(name, 0x10_000 + i as u64).unwrap();
        }
        assert_eq!(builder.len(), 40);
        let image = builder.finish(bump(512)).unwrap();
        let file = materialize(&image.blocks);

        let heap = LocalHeap::parse(&file, image.symbol_table.local_heap_address as usize, 8, 8).unwrap();
        for (i, name) in names.iter().enumerate() {
            let entry = lookup_group_entry(&file, image.symbol_table.btree_address, &heap, name, 8, 8)
                .unwrap()
                .unwrap();
            assert_eq!(entry.object_header_address, 0x10_000 + i as u64);
        }
        assert_eq!(
            lookup_group_entry(&file, image.symbol_table.btree_address, &heap, "missing", 8, 8).unwrap(),
            None
        );

        let members = iterate_group(&file, image.symbol_table.btree_address, &heap, 8, 8).unwrap();
        let listed: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(listed, sorted);

        // the tree grew past one level
        let root = BTreeV1Node::parse(
            &file,
            image.symbol_table.btree_address as usize,
            8,
            KeyLayout::Group { length_size: 8 },
        )
        .unwrap();
        assert!(root.node_level >= 1);
        assert!(root.children.len() <= 4);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut builder = GroupTreeBuilder::new(&BTreeProps::default(), &HeapProps::default());
        builder.insert("a", 1).unwrap();
        assert_eq!(
            builder.insert("a", 2),
            Err(FormatError::DuplicateLink("a".into()))
        );
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn empty_group_has_empty_root() {
        let builder = GroupTreeBuilder::new(&BTreeProps::default(), &HeapProps::default());
        let image = builder.finish(bump(0)).unwrap();
        let file = materialize(&image.blocks);
        let heap = LocalHeap::parse(&file, image.symbol_table.local_heap_address as usize, 8, 8).unwrap();
        assert!(iterate_group(&file, image.symbol_table.btree_address, &heap, 8, 8)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn chunk_tree_splits_with_siblings() {
        let props = BTreeProps::new().chunk_k(2);
        let mut builder = ChunkTreeBuilder::new(&[4, 4], &props);
        let mut expected = Vec::new();
        for row in (0..16u64).rev() {
            for col in 0..2u64 {
                let chunk = ChunkRecord {
                    offsets: vec![row * 4, col * 4],
                    size: 64,
                    filter_mask: 0,
                    address: 0x100_000 + row * 100 + col,
                };
                expected.push(chunk.clone());
                builder.insert(chunk).unwrap();
            }
        }
        assert_eq!(builder.len(), 32);
        let image = builder.finish(bump(64)).unwrap();
        let file = materialize(&image.nodes);

        let chunks = collect_chunks(&file, image.root_address, 8, 2).unwrap();
        expected.sort_by(|a, b| a.offsets.cmp(&b.offsets));
        assert_eq!(chunks, expected);

        let hit = find_chunk(&file, image.root_address, 8, &[20, 4]).unwrap().unwrap();
        assert_eq!(hit.address, 0x100_000 + 5 * 100 + 1);

        let layout = KeyLayout::Chunk { rank: 2 };
        let chain = leaf_chain(&file, image.root_address, 8, layout).unwrap();
        assert!(chain.len() > 1);
        let total: usize = chain.iter().map(|n| n.children.len()).sum();
        assert_eq!(total, 32);
    }

    #[test]
    fn chunk_insert_validates_origin() {
        let mut builder = ChunkTreeBuilder::new(&[4], &BTreeProps::default());
        let bad = ChunkRecord {
            offsets: vec![3],
            size: 1,
            filter_mask: 0,
            address: 0,
        };
        assert_eq!(builder.insert(bad), Err(FormatError::ValueOutOfRange));
        let replaced = ChunkRecord {
            offsets: vec![4],
            size: 9,
            filter_mask: 0,
            address: 7,
        };
        builder.insert(replaced.clone()).unwrap();
        builder.insert(ChunkRecord { address: 8, ..replaced }).unwrap();
        assert_eq!(builder.len(), 1);
    }
}
