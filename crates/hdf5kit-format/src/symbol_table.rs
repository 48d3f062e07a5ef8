//! HDF5 Symbol Table Message and Symbol Table Node (SNOD) parsing.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::bytes::{ByteCursor, ByteWriter};
use crate::error::FormatError;

/// Cache type of an entry with no cached metadata.
pub const CACHE_NONE: u32 = 0;
/// Cache type of a group entry; the scratch pad holds its B-tree and heap.
pub const CACHE_GROUP: u32 = 1;
/// Cache type of a soft link; the scratch pad holds its heap offset.
pub const CACHE_SOFT_LINK: u32 = 2;

/// Symbol Table message (type 0x0011) found in v1 group object headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// Address of B-tree v1 (type 0) for this group.
    pub btree_address: u64,
    /// Address of the local heap for this group.
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    /// Parse a Symbol Table message from raw message data bytes.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTableMessage, FormatError> {
        let mut c = ByteCursor::new(data);
        Ok(SymbolTableMessage {
            btree_address: c.offset(offset_size)?,
            local_heap_address: c.offset(offset_size)?,
        })
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 * offset_size as usize);
        buf.put_uint(self.btree_address, offset_size as usize);
        buf.put_uint(self.local_heap_address, offset_size as usize);
        buf
    }
}

/// A single entry in a Symbol Table Node (SNOD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// Byte offset of the link name in the local heap.
    pub link_name_offset: u64,
    /// Address of the child object's header.
    pub object_header_address: u64,
    /// Cache type: 0=none, 1=group, 2=symbolic link.
    pub cache_type: u32,
    /// 16-byte scratch pad (cached data).
    pub scratch_pad: [u8; 16],
}

impl SymbolTableEntry {
    /// Entry with no cached metadata.
    pub fn new(link_name_offset: u64, object_header_address: u64) -> Self {
        Self {
            link_name_offset,
            object_header_address,
            cache_type: CACHE_NONE,
            scratch_pad: [0; 16],
        }
    }

    /// Entry for a group, caching its symbol table message in the scratch pad.
    pub fn group(link_name_offset: u64, object_header_address: u64, stab: &SymbolTableMessage) -> Self {
        let mut scratch_pad = [0u8; 16];
        scratch_pad[..8].copy_from_slice(&stab.btree_address.to_le_bytes());
        scratch_pad[8..].copy_from_slice(&stab.local_heap_address.to_le_bytes());
        Self {
            link_name_offset,
            object_header_address,
            cache_type: CACHE_GROUP,
            scratch_pad,
        }
    }

    /// Cached symbol table message of a group entry.
    pub fn cached_group(&self) -> Option<SymbolTableMessage> {
        if self.cache_type != CACHE_GROUP {
            return None;
        }
        SymbolTableMessage::parse(&self.scratch_pad, 8).ok()
    }

    /// link name offset + header address + cache type + reserved + scratch pad
    pub fn encoded_size(offset_size: u8) -> usize {
        2 * offset_size as usize + 4 + 4 + 16
    }

    pub fn parse(c: &mut ByteCursor<'_>, offset_size: u8) -> Result<Self, FormatError> {
        let link_name_offset = c.offset(offset_size)?;
        let object_header_address = c.offset(offset_size)?;
        let cache_type = c.u32()?;
        c.skip(4)?;
        let mut scratch_pad = [0u8; 16];
        scratch_pad.copy_from_slice(c.take(16)?);
        Ok(Self {
            link_name_offset,
            object_header_address,
            cache_type,
            scratch_pad,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>, offset_size: u8) {
        buf.put_uint(self.link_name_offset, offset_size as usize);
        buf.put_uint(self.object_header_address, offset_size as usize);
        buf.put_u32(self.cache_type);
        buf.put_zeros(4);
        buf.extend_from_slice(&self.scratch_pad);
    }
}

/// A parsed Symbol Table Node (SNOD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableNode {
    /// The symbol table entries.
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    /// Parse a Symbol Table Node at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
    ) -> Result<SymbolTableNode, FormatError> {
        let mut c = ByteCursor::at(file_data, offset)?;
        if c.signature()? != *b"SNOD" {
            return Err(FormatError::InvalidSymbolTableNodeSignature);
        }
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::InvalidSymbolTableNodeVersion(version));
        }
        c.skip(1)?;
        let num_symbols = c.u16()? as usize;
        let mut entries = Vec::with_capacity(num_symbols);
        for _ in 0..num_symbols {
            entries.push(SymbolTableEntry::parse(&mut c, offset_size)?);
        }
        Ok(SymbolTableNode { entries })
    }

    /// Serialized size of a node holding up to `2 * leaf_k` entries.
    pub fn encoded_size(leaf_k: u16, offset_size: u8) -> usize {
        8 + 2 * leaf_k as usize * SymbolTableEntry::encoded_size(offset_size)
    }

    /// Serialize, zero-filling unused entry slots up to `2 * leaf_k`.
    pub fn serialize(&self, leaf_k: u16, offset_size: u8) -> Result<Vec<u8>, FormatError> {
        let capacity = 2 * leaf_k as usize;
        if self.entries.len() > capacity {
            return Err(FormatError::HeapBlockFull {
                needed: self.entries.len() as u64,
                free: capacity as u64,
            });
        }
        let mut buf = Vec::with_capacity(Self::encoded_size(leaf_k, offset_size));
        buf.extend_from_slice(b"SNOD");
        buf.put_u8(1);
        buf.put_u8(0);
        buf.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            entry.serialize(&mut buf, offset_size);
        }
        buf.resize(Self::encoded_size(leaf_k, offset_size), 0);
        Ok(buf)
    }
}
