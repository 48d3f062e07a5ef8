//! HDF5 B-tree v2 (`BTHD`/`BTIN`/`BTLF`): link and attribute indices.
//!
//! Record-count fields inside internal nodes have no stored width. Their
//! widths follow from how many records a node of the header's node size
//! can hold at each depth, so [`NodeGeometry`] recomputes those limits
//! before any node is read.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::bytes::{bytes_needed, ByteCursor, ByteWriter};
use crate::checksum::jenkins_lookup3;
use crate::error::FormatError;

/// signature(4) + version(1) + type(1) + checksum(4)
const METADATA_PREFIX_SIZE: usize = 10;

/// Links indexed by name hash.
pub const TYPE_LINK_NAME: u8 = 5;
/// Links indexed by creation order.
pub const TYPE_LINK_CREATION_ORDER: u8 = 6;
/// Attributes indexed by name hash.
pub const TYPE_ATTRIBUTE_NAME: u8 = 8;
/// Attributes indexed by creation order.
pub const TYPE_ATTRIBUTE_CREATION_ORDER: u8 = 9;

/// Hash used by name-indexed link and attribute trees.
pub fn name_hash(name: &str) -> u32 {
    jenkins_lookup3(name.as_bytes())
}

/// Parsed B-tree v2 header (signature "BTHD").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    /// B-tree type: 5=links indexed by name, 6=links indexed by creation order, etc.
    pub tree_type: u8,
    /// Node size in bytes.
    pub node_size: u32,
    /// Record size in bytes.
    pub record_size: u16,
    /// Depth of the tree (0 = root is a leaf).
    pub depth: u16,
    pub split_percent: u8,
    pub merge_percent: u8,
    /// Address of root node.
    pub root_node_address: u64,
    /// Number of records in the root node.
    pub num_records_in_root: u16,
    /// Total number of records in all nodes.
    pub total_records: u64,
}

impl BTreeV2Header {
    /// Parse and checksum-verify a B-tree v2 header at the given offset.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<BTreeV2Header, FormatError> {
        let mut c = ByteCursor::at(file_data, offset)?;
        if c.signature()? != *b"BTHD" {
            return Err(FormatError::InvalidBTreeV2Signature);
        }
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::InvalidBTreeV2Version(version));
        }
        let header = BTreeV2Header {
            tree_type: c.u8()?,
            node_size: c.u32()?,
            record_size: c.u16()?,
            depth: c.u16()?,
            split_percent: c.u8()?,
            merge_percent: c.u8()?,
            root_node_address: c.offset(offset_size)?,
            num_records_in_root: c.u16()?,
            total_records: c.length(length_size)?,
        };
        verify_at(file_data, offset, c.position(), &mut c)?;
        Ok(header)
    }

    pub fn serialize(&self, offset_size: u8, length_size: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BTHD");
        buf.put_u8(0);
        buf.put_u8(self.tree_type);
        buf.put_u32(self.node_size);
        buf.put_u16(self.record_size);
        buf.put_u16(self.depth);
        buf.put_u8(self.split_percent);
        buf.put_u8(self.merge_percent);
        buf.put_uint(self.root_node_address, offset_size as usize);
        buf.put_u16(self.num_records_in_root);
        buf.put_uint(self.total_records, length_size as usize);
        let checksum = jenkins_lookup3(&buf);
        buf.put_u32(checksum);
        buf
    }
}

/// Check the checksum stored at `end` against bytes `[start, end)`.
fn verify_at(
    file_data: &[u8],
    start: usize,
    end: usize,
    c: &mut ByteCursor<'_>,
) -> Result<(), FormatError> {
    let expected = c.u32()?;
    let computed = jenkins_lookup3(&file_data[start..end]);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Per-depth record limits and field widths derived from the node size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGeometry {
    /// Most records a node at each depth can hold (index 0 = leaves).
    pub max_records: Vec<u64>,
    /// Most records in a whole subtree rooted at each depth.
    pub cum_max_records: Vec<u64>,
    /// Width of every child record-count field.
    pub nrec_width: usize,
    /// Width of the subtree-total field for a child at each depth.
    pub cum_width: Vec<usize>,
    offset_size: u8,
}

impl NodeGeometry {
    pub fn new(
        node_size: u32,
        record_size: u16,
        depth: u16,
        offset_size: u8,
    ) -> Result<Self, FormatError> {
        let bad = FormatError::InvalidBTreeV2Geometry {
            node_size,
            record_size,
        };
        let node_size_u = node_size as usize;
        let rs = record_size as usize;
        if rs == 0 || node_size_u <= METADATA_PREFIX_SIZE {
            return Err(bad);
        }
        let leaf_max = ((node_size_u - METADATA_PREFIX_SIZE) / rs) as u64;
        if leaf_max == 0 {
            return Err(bad);
        }
        let nrec_width = bytes_needed(leaf_max);
        let mut max_records = vec![leaf_max];
        let mut cum_max_records = vec![leaf_max];
        let mut cum_width = vec![0usize];
        for u in 1..=depth as usize {
            let pointer = Self::pointer_size_with(offset_size, nrec_width, &cum_width, u);
            let room = node_size_u
                .checked_sub(METADATA_PREFIX_SIZE + pointer)
                .ok_or(bad.clone())?;
            let max = (room / (rs + pointer)) as u64;
            if max == 0 {
                return Err(bad);
            }
            let cum = (max + 1)
                .saturating_mul(cum_max_records[u - 1])
                .saturating_add(max);
            max_records.push(max);
            cum_max_records.push(cum);
            cum_width.push(bytes_needed(cum));
        }
        Ok(Self {
            max_records,
            cum_max_records,
            nrec_width,
            cum_width,
            offset_size,
        })
    }

    fn pointer_size_with(offset_size: u8, nrec_width: usize, cum_width: &[usize], depth: usize) -> usize {
        offset_size as usize + nrec_width + if depth > 1 { cum_width[depth - 1] } else { 0 }
    }

    /// Size of one child pointer inside an internal node at `depth`.
    pub fn pointer_size(&self, depth: usize) -> usize {
        Self::pointer_size_with(self.offset_size, self.nrec_width, &self.cum_width, depth)
    }
}

/// A typed B-tree v2 record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeV2Record {
    /// Type 5.
    LinkName { hash: u32, heap_id: [u8; 7] },
    /// Type 6.
    LinkCreationOrder { order: u64, heap_id: [u8; 7] },
    /// Type 8.
    AttributeName {
        heap_id: [u8; 8],
        flags: u8,
        creation_order: u32,
        hash: u32,
    },
    /// Type 9.
    AttributeCreationOrder {
        heap_id: [u8; 8],
        flags: u8,
        creation_order: u32,
    },
    /// Any other record type, kept as raw bytes.
    Raw(Vec<u8>),
}

fn id7(c: &mut ByteCursor<'_>) -> Result<[u8; 7], FormatError> {
    let mut id = [0u8; 7];
    id.copy_from_slice(c.take(7)?);
    Ok(id)
}

fn id8(c: &mut ByteCursor<'_>) -> Result<[u8; 8], FormatError> {
    let mut id = [0u8; 8];
    id.copy_from_slice(c.take(8)?);
    Ok(id)
}

impl BTreeV2Record {
    pub fn parse(tree_type: u8, raw: &[u8]) -> Result<Self, FormatError> {
        let mut c = ByteCursor::new(raw);
        Ok(match tree_type {
            TYPE_LINK_NAME => BTreeV2Record::LinkName {
                hash: c.u32()?,
                heap_id: id7(&mut c)?,
            },
            TYPE_LINK_CREATION_ORDER => BTreeV2Record::LinkCreationOrder {
                order: c.u64()?,
                heap_id: id7(&mut c)?,
            },
            TYPE_ATTRIBUTE_NAME => BTreeV2Record::AttributeName {
                heap_id: id8(&mut c)?,
                flags: c.u8()?,
                creation_order: c.u32()?,
                hash: c.u32()?,
            },
            TYPE_ATTRIBUTE_CREATION_ORDER => BTreeV2Record::AttributeCreationOrder {
                heap_id: id8(&mut c)?,
                flags: c.u8()?,
                creation_order: c.u32()?,
            },
            _ => BTreeV2Record::Raw(raw.to_vec()),
        })
    }

    /// Encode into exactly `record_size` bytes.
    pub fn serialize(&self, record_size: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(record_size as usize);
        match self {
            BTreeV2Record::LinkName { hash, heap_id } => {
                buf.put_u32(*hash);
                buf.extend_from_slice(heap_id);
            }
            BTreeV2Record::LinkCreationOrder { order, heap_id } => {
                buf.put_u64(*order);
                buf.extend_from_slice(heap_id);
            }
            BTreeV2Record::AttributeName {
                heap_id,
                flags,
                creation_order,
                hash,
            } => {
                buf.extend_from_slice(heap_id);
                buf.put_u8(*flags);
                buf.put_u32(*creation_order);
                buf.put_u32(*hash);
            }
            BTreeV2Record::AttributeCreationOrder {
                heap_id,
                flags,
                creation_order,
            } => {
                buf.extend_from_slice(heap_id);
                buf.put_u8(*flags);
                buf.put_u32(*creation_order);
            }
            BTreeV2Record::Raw(raw) => buf.extend_from_slice(raw),
        }
        buf.resize(record_size as usize, 0);
        buf
    }

    /// Name hash of name-indexed records.
    pub fn hash(&self) -> Option<u32> {
        match self {
            BTreeV2Record::LinkName { hash, .. } | BTreeV2Record::AttributeName { hash, .. } => {
                Some(*hash)
            }
            _ => None,
        }
    }

    /// Heap id of the link or attribute message this record indexes.
    pub fn heap_id(&self) -> Option<&[u8]> {
        match self {
            BTreeV2Record::LinkName { heap_id, .. }
            | BTreeV2Record::LinkCreationOrder { heap_id, .. } => Some(heap_id),
            BTreeV2Record::AttributeName { heap_id, .. }
            | BTreeV2Record::AttributeCreationOrder { heap_id, .. } => Some(heap_id),
            BTreeV2Record::Raw(_) => None,
        }
    }

    fn sort_key(&self) -> (u64, Vec<u8>) {
        match self {
            BTreeV2Record::LinkName { hash, .. } | BTreeV2Record::AttributeName { hash, .. } => {
                (*hash as u64, Vec::new())
            }
            BTreeV2Record::LinkCreationOrder { order, .. } => (*order, Vec::new()),
            BTreeV2Record::AttributeCreationOrder { creation_order, .. } => {
                (*creation_order as u64, Vec::new())
            }
            BTreeV2Record::Raw(raw) => (0, raw.clone()),
        }
    }
}

/// An internal node's child pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer {
    pub address: u64,
    pub num_records: u64,
    /// Records in the whole child subtree (equal to `num_records` for leaves).
    pub total_records: u64,
}

/// An opened B-tree v2: verified header plus node geometry.
#[derive(Debug, Clone)]
pub struct BTreeV2 {
    pub header: BTreeV2Header,
    pub geometry: NodeGeometry,
    offset_size: u8,
}

impl BTreeV2 {
    pub fn open(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<Self, FormatError> {
        let header = BTreeV2Header::parse(file_data, offset, offset_size, length_size)?;
        let geometry = NodeGeometry::new(header.node_size, header.record_size, header.depth, offset_size)?;
        log::trace!(
            "BTHD @{offset:#x}: type {}, depth {}, {} records",
            header.tree_type,
            header.depth,
            header.total_records
        );
        Ok(Self {
            header,
            geometry,
            offset_size,
        })
    }

    fn check_node_prefix(
        &self,
        c: &mut ByteCursor<'_>,
        signature: &[u8; 4],
    ) -> Result<(), FormatError> {
        if c.signature()? != *signature {
            return Err(FormatError::InvalidBTreeV2Signature);
        }
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::InvalidBTreeV2Version(version));
        }
        let tree_type = c.u8()?;
        if tree_type != self.header.tree_type {
            return Err(FormatError::InvalidBTreeNodeType(tree_type));
        }
        Ok(())
    }

    fn read_records(
        &self,
        c: &mut ByteCursor<'_>,
        count: u64,
    ) -> Result<Vec<BTreeV2Record>, FormatError> {
        let rs = self.header.record_size as usize;
        (0..count)
            .map(|_| BTreeV2Record::parse(self.header.tree_type, c.take(rs)?))
            .collect()
    }

    /// Records of the leaf at `address`.
    pub fn read_leaf(
        &self,
        file_data: &[u8],
        address: u64,
        num_records: u64,
    ) -> Result<Vec<BTreeV2Record>, FormatError> {
        if num_records > self.geometry.max_records[0] {
            return Err(FormatError::InvalidBTreeV2Geometry {
                node_size: self.header.node_size,
                record_size: self.header.record_size,
            });
        }
        let start = address as usize;
        let mut c = ByteCursor::at(file_data, start)?;
        self.check_node_prefix(&mut c, b"BTLF")?;
        let records = self.read_records(&mut c, num_records)?;
        verify_at(file_data, start, c.position(), &mut c)?;
        Ok(records)
    }

    /// Records and child pointers of the internal node at `address`.
    pub fn read_internal(
        &self,
        file_data: &[u8],
        address: u64,
        num_records: u64,
        depth: u16,
    ) -> Result<(Vec<BTreeV2Record>, Vec<ChildPointer>), FormatError> {
        let d = depth as usize;
        if d == 0 || d >= self.geometry.max_records.len() || num_records > self.geometry.max_records[d] {
            return Err(FormatError::InvalidBTreeV2Geometry {
                node_size: self.header.node_size,
                record_size: self.header.record_size,
            });
        }
        let start = address as usize;
        let mut c = ByteCursor::at(file_data, start)?;
        self.check_node_prefix(&mut c, b"BTIN")?;
        let records = self.read_records(&mut c, num_records)?;
        let mut children = Vec::with_capacity(num_records as usize + 1);
        for _ in 0..=num_records {
            let address = c.offset(self.offset_size)?;
            let num = c.uint(self.geometry.nrec_width)?;
            let total = if d > 1 {
                c.uint(self.geometry.cum_width[d - 1])?
            } else {
                num
            };
            children.push(ChildPointer {
                address,
                num_records: num,
                total_records: total,
            });
        }
        verify_at(file_data, start, c.position(), &mut c)?;
        Ok((records, children))
    }

    /// All records in key order.
    pub fn records(&self, file_data: &[u8]) -> Result<Vec<BTreeV2Record>, FormatError> {
        let mut out = Vec::new();
        if self.header.total_records == 0 || self.header.num_records_in_root == 0 {
            return Ok(out);
        }
        self.collect(
            file_data,
            self.header.root_node_address,
            self.header.num_records_in_root as u64,
            self.header.depth,
            &mut out,
        )?;
        Ok(out)
    }

    fn collect(
        &self,
        file_data: &[u8],
        address: u64,
        num_records: u64,
        depth: u16,
        out: &mut Vec<BTreeV2Record>,
    ) -> Result<(), FormatError> {
        if depth == 0 {
            out.extend(self.read_leaf(file_data, address, num_records)?);
            return Ok(());
        }
        let (records, children) = self.read_internal(file_data, address, num_records, depth)?;
        let mut records = records.into_iter();
        for child in children {
            self.collect(file_data, child.address, child.num_records, depth - 1, out)?;
            if let Some(r) = records.next() {
                out.push(r);
            }
        }
        Ok(())
    }

    /// Records whose name hash equals `hash`, descending only into subtrees
    /// whose key range can contain it.
    pub fn find_by_hash(
        &self,
        file_data: &[u8],
        hash: u32,
    ) -> Result<Vec<BTreeV2Record>, FormatError> {
        let mut out = Vec::new();
        if self.header.num_records_in_root == 0 {
            return Ok(out);
        }
        self.find_in(
            file_data,
            self.header.root_node_address,
            self.header.num_records_in_root as u64,
            self.header.depth,
            hash,
            &mut out,
        )?;
        Ok(out)
    }

    fn find_in(
        &self,
        file_data: &[u8],
        address: u64,
        num_records: u64,
        depth: u16,
        hash: u32,
        out: &mut Vec<BTreeV2Record>,
    ) -> Result<(), FormatError> {
        if depth == 0 {
            out.extend(
                self.read_leaf(file_data, address, num_records)?
                    .into_iter()
                    .filter(|r| r.hash() == Some(hash)),
            );
            return Ok(());
        }
        let (records, children) = self.read_internal(file_data, address, num_records, depth)?;
        for (i, record) in records.iter().enumerate() {
            let key = record.hash().ok_or(FormatError::InvalidBTreeNodeType(self.header.tree_type))?;
            if hash <= key {
                let child = children[i];
                self.find_in(file_data, child.address, child.num_records, depth - 1, hash, out)?;
            }
            if hash == key {
                out.push(record.clone());
            }
            if hash < key {
                return Ok(());
            }
        }
        if let Some(last) = children.last() {
            self.find_in(file_data, last.address, last.num_records, depth - 1, hash, out)?;
        }
        Ok(())
    }
}

/// Serialized tree: header address plus every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Image {
    pub header_address: u64,
    pub blocks: Vec<(u64, Vec<u8>)>,
}

/// Bulk-loads a B-tree v2 from a complete set of records.
pub struct BTreeV2Writer {
    tree_type: u8,
    node_size: u32,
    record_size: u16,
    offset_size: u8,
    length_size: u8,
}

impl BTreeV2Writer {
    pub fn new(tree_type: u8, node_size: u32, record_size: u16) -> Self {
        Self {
            tree_type,
            node_size,
            record_size,
            offset_size: 8,
            length_size: 8,
        }
    }

    pub fn sizes(mut self, offset_size: u8, length_size: u8) -> Self {
        self.offset_size = offset_size;
        self.length_size = length_size;
        self
    }

    /// Sort `records`, build the shallowest tree that holds them, and lay
    /// out header and nodes through `alloc`.
    pub fn build<A: FnMut(u64) -> u64>(
        &self,
        mut records: Vec<BTreeV2Record>,
        mut alloc: A,
    ) -> Result<BTreeV2Image, FormatError> {
        records.sort_by_key(BTreeV2Record::sort_key);
        let n = records.len() as u64;
        let mut depth = 0u16;
        let geometry = loop {
            let g = NodeGeometry::new(self.node_size, self.record_size, depth, self.offset_size)?;
            if g.cum_max_records[depth as usize] >= n {
                break g;
            }
            depth += 1;
            if depth > 16 {
                return Err(FormatError::InvalidBTreeV2Geometry {
                    node_size: self.node_size,
                    record_size: self.record_size,
                });
            }
        };

        let header_len = BTreeV2Header {
            tree_type: self.tree_type,
            node_size: self.node_size,
            record_size: self.record_size,
            depth,
            split_percent: 100,
            merge_percent: 40,
            root_node_address: 0,
            num_records_in_root: 0,
            total_records: 0,
        }
        .serialize(self.offset_size, self.length_size)
        .len();
        let header_address = alloc(header_len as u64);

        let mut blocks = Vec::new();
        let root = if n == 0 {
            ChildPointer {
                address: crate::bytes::UNDEFINED_ADDRESS,
                num_records: 0,
                total_records: 0,
            }
        } else {
            self.build_node(&records, depth, &geometry, &mut alloc, &mut blocks)?
        };
        let header = BTreeV2Header {
            tree_type: self.tree_type,
            node_size: self.node_size,
            record_size: self.record_size,
            depth,
            split_percent: 100,
            merge_percent: 40,
            root_node_address: root.address,
            num_records_in_root: root.num_records as u16,
            total_records: n,
        };
        blocks.push((header_address, header.serialize(self.offset_size, self.length_size)));
        Ok(BTreeV2Image {
            header_address,
            blocks,
        })
    }

    fn build_node<A: FnMut(u64) -> u64>(
        &self,
        records: &[BTreeV2Record],
        depth: u16,
        geometry: &NodeGeometry,
        alloc: &mut A,
        blocks: &mut Vec<(u64, Vec<u8>)>,
    ) -> Result<ChildPointer, FormatError> {
        let mut buf = Vec::with_capacity(self.node_size as usize);
        let n = records.len() as u64;
        if depth == 0 {
            buf.extend_from_slice(b"BTLF");
            buf.put_u8(0);
            buf.put_u8(self.tree_type);
            for r in records {
                buf.extend(r.serialize(self.record_size));
            }
            let address = self.finish_node(buf, alloc, blocks);
            return Ok(ChildPointer {
                address,
                num_records: n,
                total_records: n,
            });
        }

        // fewest children whose subtrees, plus separators, cover n
        let child_cap = geometry.cum_max_records[depth as usize - 1];
        let children = (n + 1).div_ceil(child_cap + 1).max(2).min(n + 1);
        let separators = children - 1;
        let per_child = (n - separators) / children;
        let extra = (n - separators) % children;

        let mut pointers = Vec::with_capacity(children as usize);
        let mut keys = Vec::with_capacity(separators as usize);
        let mut pos = 0usize;
        for i in 0..children {
            let take = (per_child + u64::from(i < extra)) as usize;
            pointers.push(self.build_node(
                &records[pos..pos + take],
                depth - 1,
                geometry,
                alloc,
                blocks,
            )?);
            pos += take;
            if i < separators {
                keys.push(&records[pos]);
                pos += 1;
            }
        }

        buf.extend_from_slice(b"BTIN");
        buf.put_u8(0);
        buf.put_u8(self.tree_type);
        for r in &keys {
            buf.extend(r.serialize(self.record_size));
        }
        let d = depth as usize;
        for p in &pointers {
            buf.put_uint(p.address, self.offset_size as usize);
            buf.put_uint(p.num_records, geometry.nrec_width);
            if d > 1 {
                buf.put_uint(p.total_records, geometry.cum_width[d - 1]);
            }
        }
        let address = self.finish_node(buf, alloc, blocks);
        Ok(ChildPointer {
            address,
            num_records: separators,
            total_records: n,
        })
    }

    fn finish_node<A: FnMut(u64) -> u64>(
        &self,
        mut buf: Vec<u8>,
        alloc: &mut A,
        blocks: &mut Vec<(u64, Vec<u8>)>,
    ) -> u64 {
        let checksum = jenkins_lookup3(&buf);
        buf.put_u32(checksum);
        buf.resize(self.node_size as usize, 0);
        let address = alloc(self.node_size as u64);
        blocks.push((address, buf));
        address
    }
}
