//! HDF5 B-tree v1 (`TREE`): group name indices (type 0) and chunk indices
//! (type 1).

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use core::cmp::Ordering;

use crate::bytes::{ByteCursor, ByteWriter, UNDEFINED_ADDRESS};
use crate::error::FormatError;
use crate::local_heap::LocalHeap;
use crate::symbol_table::{SymbolTableEntry, SymbolTableNode};

/// Node type of group trees.
pub const NODE_TYPE_GROUP: u8 = 0;
/// Node type of chunk trees.
pub const NODE_TYPE_CHUNK: u8 = 1;

/// Descent through a corrupt file could otherwise loop forever.
const MAX_DEPTH: u8 = 64;

/// Key of a chunk tree: chunk byte size, filter mask and the chunk's
/// element offsets (one per dataset dimension plus a trailing zero for the
/// element-size dimension).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub chunk_size: u32,
    pub filter_mask: u32,
    pub offsets: Vec<u64>,
}

impl ChunkKey {
    /// Compare against chunk coordinates, ignoring the trailing dimension.
    fn cmp_coords(&self, coords: &[u64]) -> Ordering {
        let rank = coords.len().min(self.offsets.len());
        self.offsets[..rank].cmp(&coords[..rank])
    }
}

/// Key layout of a tree, which fixes the key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// Local heap offsets encoded with the file's length size.
    Group { length_size: u8 },
    /// Chunk keys for a dataset of `rank` dimensions.
    Chunk { rank: usize },
}

impl KeyLayout {
    pub fn node_type(self) -> u8 {
        match self {
            KeyLayout::Group { .. } => NODE_TYPE_GROUP,
            KeyLayout::Chunk { .. } => NODE_TYPE_CHUNK,
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            KeyLayout::Group { length_size } => length_size as usize,
            KeyLayout::Chunk { rank } => 8 + 8 * (rank + 1),
        }
    }
}

/// A node key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeV1Key {
    /// Local heap offset of a link name.
    Group(u64),
    Chunk(ChunkKey),
}

impl BTreeV1Key {
    pub fn heap_offset(&self) -> Option<u64> {
        match self {
            BTreeV1Key::Group(o) => Some(*o),
            BTreeV1Key::Chunk(_) => None,
        }
    }

    pub fn as_chunk(&self) -> Option<&ChunkKey> {
        match self {
            BTreeV1Key::Chunk(k) => Some(k),
            BTreeV1Key::Group(_) => None,
        }
    }

    fn parse(c: &mut ByteCursor<'_>, layout: KeyLayout) -> Result<Self, FormatError> {
        match layout {
            KeyLayout::Group { length_size } => Ok(BTreeV1Key::Group(c.length(length_size)?)),
            KeyLayout::Chunk { rank } => {
                let chunk_size = c.u32()?;
                let filter_mask = c.u32()?;
                let offsets = (0..=rank).map(|_| c.u64()).collect::<Result<Vec<_>, _>>()?;
                Ok(BTreeV1Key::Chunk(ChunkKey {
                    chunk_size,
                    filter_mask,
                    offsets,
                }))
            }
        }
    }

    fn serialize(&self, buf: &mut Vec<u8>, layout: KeyLayout) {
        match (self, layout) {
            (BTreeV1Key::Group(o), KeyLayout::Group { length_size }) => {
                buf.put_uint(*o, length_size as usize)
            }
            (BTreeV1Key::Chunk(k), KeyLayout::Chunk { rank }) => {
                buf.put_u32(k.chunk_size);
                buf.put_u32(k.filter_mask);
                for i in 0..=rank {
                    buf.put_u64(k.offsets.get(i).copied().unwrap_or(0));
                }
            }
            // a key of the other flavor is written as zeros
            (_, layout) => buf.put_zeros(layout.key_size()),
        }
    }
}

/// A parsed B-tree v1 node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    /// Node type: 0=group, 1=raw data chunks.
    pub node_type: u8,
    /// Node level: 0=leaf, >0=internal.
    pub node_level: u8,
    /// Left sibling address, or None if undefined.
    pub left_sibling: Option<u64>,
    /// Right sibling address, or None if undefined.
    pub right_sibling: Option<u64>,
    /// Keys (entries_used + 1 values).
    pub keys: Vec<BTreeV1Key>,
    /// Child addresses (entries_used values).
    pub children: Vec<u64>,
}

impl BTreeV1Node {
    /// Parse a B-tree v1 node at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        layout: KeyLayout,
    ) -> Result<BTreeV1Node, FormatError> {
        let mut c = ByteCursor::at(file_data, offset)?;
        if c.signature()? != *b"TREE" {
            return Err(FormatError::InvalidBTreeSignature);
        }
        let node_type = c.u8()?;
        if node_type != layout.node_type() {
            return Err(FormatError::InvalidBTreeNodeType(node_type));
        }
        let node_level = c.u8()?;
        let entries_used = c.u16()? as usize;
        let left_sibling = c.optional_offset(offset_size)?;
        let right_sibling = c.optional_offset(offset_size)?;

        // key[0], child[0], key[1], child[1], ..., child[N-1], key[N]
        let mut keys = Vec::with_capacity(entries_used + 1);
        let mut children = Vec::with_capacity(entries_used);
        for _ in 0..entries_used {
            keys.push(BTreeV1Key::parse(&mut c, layout)?);
            children.push(c.offset(offset_size)?);
        }
        keys.push(BTreeV1Key::parse(&mut c, layout)?);

        Ok(BTreeV1Node {
            node_type,
            node_level,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    pub fn entries_used(&self) -> usize {
        self.children.len()
    }

    /// Size of a node with room for `2 * k` children.
    pub fn encoded_size(k: u16, offset_size: u8, layout: KeyLayout) -> usize {
        let entries = 2 * k as usize;
        8 + 2 * offset_size as usize
            + entries * offset_size as usize
            + (entries + 1) * layout.key_size()
    }

    /// Serialize into a node with room for `2 * k` children.
    pub fn serialize(&self, k: u16, offset_size: u8, layout: KeyLayout) -> Result<Vec<u8>, FormatError> {
        let capacity = 2 * k as usize;
        if self.children.len() > capacity || self.keys.len() != self.children.len() + 1 {
            return Err(FormatError::InvalidBTreeNodeType(self.node_type));
        }
        let os = offset_size as usize;
        let undefined = UNDEFINED_ADDRESS;
        let mut buf = Vec::with_capacity(Self::encoded_size(k, offset_size, layout));
        buf.extend_from_slice(b"TREE");
        buf.put_u8(layout.node_type());
        buf.put_u8(self.node_level);
        buf.put_u16(self.children.len() as u16);
        buf.put_uint(self.left_sibling.unwrap_or(undefined), os);
        buf.put_uint(self.right_sibling.unwrap_or(undefined), os);
        for (key, child) in self.keys.iter().zip(&self.children) {
            key.serialize(&mut buf, layout);
            buf.put_uint(*child, os);
        }
        if let Some(last) = self.keys.last() {
            last.serialize(&mut buf, layout);
        }
        buf.resize(Self::encoded_size(k, offset_size, layout), 0);
        Ok(buf)
    }
}

/// Collect all leaf-level child addresses (SNOD addresses) by traversing the B-tree.
pub fn collect_symbol_table_nodes(
    file_data: &[u8],
    btree_address: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<u64>, FormatError> {
    let layout = KeyLayout::Group { length_size };
    let mut result = Vec::new();
    collect_leaf_children(file_data, btree_address, offset_size, layout, MAX_DEPTH, &mut |node| {
        result.extend_from_slice(&node.children);
        Ok(())
    })?;
    Ok(result)
}

/// In-order visit of every level-0 node below `address`.
fn collect_leaf_children<F>(
    file_data: &[u8],
    address: u64,
    offset_size: u8,
    layout: KeyLayout,
    depth_left: u8,
    visit: &mut F,
) -> Result<(), FormatError>
where
    F: FnMut(&BTreeV1Node) -> Result<(), FormatError>,
{
    if depth_left == 0 {
        return Err(FormatError::InvalidBTreeNodeType(layout.node_type()));
    }
    let node = BTreeV1Node::parse(file_data, address as usize, offset_size, layout)?;
    if node.node_level == 0 {
        return visit(&node);
    }
    for &child in &node.children {
        collect_leaf_children(file_data, child, offset_size, layout, depth_left - 1, visit)?;
    }
    Ok(())
}

/// All group members in name order, with their names read from the heap.
pub fn iterate_group(
    file_data: &[u8],
    btree_address: u64,
    heap: &LocalHeap,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<(String, SymbolTableEntry)>, FormatError> {
    let mut members = Vec::new();
    for snod in collect_symbol_table_nodes(file_data, btree_address, offset_size, length_size)? {
        let node = SymbolTableNode::parse(file_data, snod as usize, offset_size)?;
        for entry in node.entries {
            let name = heap.read_string(file_data, entry.link_name_offset)?;
            members.push((name, entry));
        }
    }
    Ok(members)
}

/// Resolve a group member by name.
///
/// Child `i` of a node holds names in `(key[i], key[i+1]]`, so the descent
/// picks the first child whose right key is not below `name`.
pub fn lookup_group_entry(
    file_data: &[u8],
    btree_address: u64,
    heap: &LocalHeap,
    name: &str,
    offset_size: u8,
    length_size: u8,
) -> Result<Option<SymbolTableEntry>, FormatError> {
    let layout = KeyLayout::Group { length_size };
    let mut address = btree_address;
    for _ in 0..MAX_DEPTH {
        let node = BTreeV1Node::parse(file_data, address as usize, offset_size, layout)?;
        let mut chosen = None;
        for (i, key) in node.keys.iter().enumerate().skip(1) {
            let offset = key.heap_offset().unwrap_or(0);
            if name <= heap.read_string(file_data, offset)?.as_str() {
                chosen = Some(node.children[i - 1]);
                break;
            }
        }
        let Some(child) = chosen else {
            return Ok(None);
        };
        if node.node_level > 0 {
            address = child;
            continue;
        }
        let snod = SymbolTableNode::parse(file_data, child as usize, offset_size)?;
        for entry in snod.entries {
            if heap.read_string(file_data, entry.link_name_offset)? == name {
                return Ok(Some(entry));
            }
        }
        return Ok(None);
    }
    Err(FormatError::InvalidBTreeNodeType(NODE_TYPE_GROUP))
}

/// A chunk located through the chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Element offsets of the chunk origin, one per dataset dimension.
    pub offsets: Vec<u64>,
    /// Stored (possibly filtered) size in bytes.
    pub size: u32,
    /// Bit `i` set means filter `i` of the pipeline was skipped.
    pub filter_mask: u32,
    /// File address of the chunk bytes.
    pub address: u64,
}

fn chunk_record(key: &BTreeV1Key, address: u64, rank: usize) -> Result<ChunkRecord, FormatError> {
    let key = key.as_chunk().ok_or(FormatError::InvalidBTreeNodeType(NODE_TYPE_GROUP))?;
    Ok(ChunkRecord {
        offsets: key.offsets[..rank.min(key.offsets.len())].to_vec(),
        size: key.chunk_size,
        filter_mask: key.filter_mask,
        address,
    })
}

/// Every chunk of a dataset, in index order.
pub fn collect_chunks(
    file_data: &[u8],
    btree_address: u64,
    offset_size: u8,
    rank: usize,
) -> Result<Vec<ChunkRecord>, FormatError> {
    let layout = KeyLayout::Chunk { rank };
    let mut chunks = Vec::new();
    collect_leaf_children(file_data, btree_address, offset_size, layout, MAX_DEPTH, &mut |node| {
        for (key, &child) in node.keys.iter().zip(&node.children) {
            chunks.push(chunk_record(key, child, rank)?);
        }
        Ok(())
    })?;
    Ok(chunks)
}

/// The chunk whose origin is exactly `coords`, if stored.
pub fn find_chunk(
    file_data: &[u8],
    btree_address: u64,
    offset_size: u8,
    coords: &[u64],
) -> Result<Option<ChunkRecord>, FormatError> {
    let rank = coords.len();
    let layout = KeyLayout::Chunk { rank };
    let mut address = btree_address;
    for _ in 0..MAX_DEPTH {
        let node = BTreeV1Node::parse(file_data, address as usize, offset_size, layout)?;
        // largest i with key[i] <= coords
        let mut chosen = None;
        for (i, key) in node.keys.iter().take(node.children.len()).enumerate() {
            let Some(k) = key.as_chunk() else { break };
            if k.cmp_coords(coords) == Ordering::Greater {
                break;
            }
            chosen = Some(i);
        }
        let Some(i) = chosen else {
            return Ok(None);
        };
        if node.node_level > 0 {
            address = node.children[i];
            continue;
        }
        let key = &node.keys[i];
        let exact = key.as_chunk().is_some_and(|k| k.cmp_coords(coords) == Ordering::Equal);
        return if exact {
            chunk_record(key, node.children[i], rank).map(Some)
        } else {
            Ok(None)
        };
    }
    Err(FormatError::InvalidBTreeNodeType(NODE_TYPE_CHUNK))
}

/// Level-0 nodes reached by descending to the leftmost leaf and then
/// following right-sibling pointers.
pub fn leaf_chain(
    file_data: &[u8],
    btree_address: u64,
    offset_size: u8,
    layout: KeyLayout,
) -> Result<Vec<BTreeV1Node>, FormatError> {
    let mut node = BTreeV1Node::parse(file_data, btree_address as usize, offset_size, layout)?;
    let mut depth = 0;
    while node.node_level > 0 {
        depth += 1;
        if depth > MAX_DEPTH {
            return Err(FormatError::InvalidBTreeNodeType(layout.node_type()));
        }
        let first = *node
            .children
            .first()
            .ok_or(FormatError::InvalidBTreeNodeType(layout.node_type()))?;
        node = BTreeV1Node::parse(file_data, first as usize, offset_size, layout)?;
    }
    let mut chain = Vec::new();
    loop {
        let next = node.right_sibling;
        chain.push(node);
        match next {
            Some(address) if chain.len() <= file_data.len() => {
                node = BTreeV1Node::parse(file_data, address as usize, offset_size, layout)?;
            }
            _ => return Ok(chain),
        }
    }
}
