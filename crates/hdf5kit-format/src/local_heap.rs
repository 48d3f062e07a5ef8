//! HDF5 Local Heap (`HEAP`): link-name storage for symbol-table groups.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use crate::bytes::{pad8, ByteCursor, ByteWriter};
use crate::error::FormatError;

/// Free-list terminator.
pub const FREE_LIST_END: u64 = 1;

/// Parsed HDF5 Local Heap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeap {
    /// Size of the data segment in bytes.
    pub data_segment_size: u64,
    /// Offset of the free list head within the data segment.
    pub free_list_head_offset: u64,
    /// File address of the data segment.
    pub data_segment_address: u64,
}

impl LocalHeap {
    /// signature(4) + version(1) + reserved(3) + 2 lengths + 1 offset
    pub fn header_size(offset_size: u8, length_size: u8) -> usize {
        8 + 2 * length_size as usize + offset_size as usize
    }

    /// Parse a local heap header at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap, FormatError> {
        let mut c = ByteCursor::at(file_data, offset)?;
        if c.signature()? != *b"HEAP" {
            return Err(FormatError::InvalidLocalHeapSignature);
        }
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::InvalidLocalHeapVersion(version));
        }
        c.skip(3)?;
        Ok(LocalHeap {
            data_segment_size: c.length(length_size)?,
            free_list_head_offset: c.length(length_size)?,
            data_segment_address: c.offset(offset_size)?,
        })
    }

    pub fn serialize(&self, offset_size: u8, length_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::header_size(offset_size, length_size));
        buf.extend_from_slice(b"HEAP");
        buf.put_u8(0);
        buf.put_zeros(3);
        buf.put_uint(self.data_segment_size, length_size as usize);
        buf.put_uint(self.free_list_head_offset, length_size as usize);
        buf.put_uint(self.data_segment_address, offset_size as usize);
        buf
    }

    /// The data segment bytes.
    pub fn data_segment<'a>(&self, file_data: &'a [u8]) -> Result<&'a [u8], FormatError> {
        let mut c = ByteCursor::at(file_data, self.data_segment_address as usize)?;
        c.take(self.data_segment_size as usize)
    }

    /// Read a null-terminated string from the heap's data segment at the given byte offset.
    pub fn read_string(&self, file_data: &[u8], string_offset: u64) -> Result<String, FormatError> {
        let segment = self.data_segment(file_data)?;
        read_name(segment, string_offset)
    }

    /// Free blocks as `(offset, size)` pairs, following the on-disk list.
    pub fn free_blocks(
        &self,
        file_data: &[u8],
        length_size: u8,
    ) -> Result<Vec<(u64, u64)>, FormatError> {
        let segment = self.data_segment(file_data)?;
        let mut blocks = Vec::new();
        let mut next = self.free_list_head_offset;
        while next != FREE_LIST_END && next != crate::bytes::UNDEFINED_ADDRESS {
            if blocks.len() > segment.len() {
                // a cycle in the list
                return Err(FormatError::InvalidLocalHeapSignature);
            }
            let mut c = ByteCursor::at(segment, next as usize)?;
            let following = c.length(length_size)?;
            let size = c.length(length_size)?;
            blocks.push((next, size));
            next = following;
        }
        Ok(blocks)
    }
}

fn read_name(segment: &[u8], offset: u64) -> Result<String, FormatError> {
    let mut c = ByteCursor::at(segment, offset as usize)?;
    let raw = c.c_string()?;
    core::str::from_utf8(raw)
        .map(String::from)
        .map_err(|_| FormatError::InvalidCharacterSet(0xFF))
}

/// Builds a local heap data segment, assigning offsets to names.
///
/// Names are null-terminated and 8-byte aligned. Freed ranges are kept on a
/// first-fit free list; when nothing fits, the segment doubles in size.
#[derive(Debug, Clone)]
pub struct LocalHeapWriter {
    data: Vec<u8>,
    free: Vec<(u64, u64)>,
    offset_size: u8,
    length_size: u8,
}

impl LocalHeapWriter {
    /// Empty heap whose offset 0 holds the empty name.
    pub fn new(initial_size: u64, offset_size: u8, length_size: u8) -> Self {
        let size = pad8(initial_size.max(8) as usize);
        let mut writer = Self {
            data: vec![0; size],
            free: Vec::new(),
            offset_size,
            length_size,
        };
        if size > 8 {
            writer.free.push((8, size as u64 - 8));
        }
        writer
    }

    /// Writer seeded from an existing heap in a file image.
    pub fn from_existing(
        heap: &LocalHeap,
        file_data: &[u8],
        offset_size: u8,
        length_size: u8,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            data: heap.data_segment(file_data)?.to_vec(),
            free: heap.free_blocks(file_data, length_size)?,
            offset_size,
            length_size,
        })
    }

    fn min_free_block(&self) -> u64 {
        2 * self.length_size as u64
    }

    /// Store `name` and return its offset in the data segment.
    pub fn add_name(&mut self, name: &str) -> Result<u64, FormatError> {
        if name.as_bytes().contains(&0) {
            return Err(FormatError::InvalidCharacterSet(0));
        }
        let needed = pad8(name.len() + 1) as u64;
        let slot = match self.free.iter().position(|&(_, size)| size >= needed) {
            Some(i) => i,
            None => {
                self.grow(needed);
                self.free
                    .iter()
                    .position(|&(_, size)| size >= needed)
                    .ok_or(FormatError::HeapBlockFull { needed, free: 0 })?
            }
        };
        let (offset, size) = self.free[slot];
        if size - needed >= self.min_free_block() {
            self.free[slot] = (offset + needed, size - needed);
        } else {
            self.free.remove(slot);
        }
        let start = offset as usize;
        self.data[start..start + needed as usize].fill(0);
        self.data[start..start + name.len()].copy_from_slice(name.as_bytes());
        Ok(offset)
    }

    fn grow(&mut self, needed: u64) {
        let old = self.data.len() as u64;
        let mut new_size = old.max(8);
        while new_size - old < needed
            && !self.trailing_free().is_some_and(|(_, s)| s + new_size - old >= needed)
        {
            new_size *= 2;
        }
        log::debug!("local heap grows from {old} to {new_size} bytes");
        self.data.resize(new_size as usize, 0);
        let added = new_size - old;
        match self.free.iter_mut().find(|(o, s)| o + *s == old) {
            Some(block) => block.1 += added,
            None => self.free.push((old, added)),
        }
    }

    fn trailing_free(&self) -> Option<(u64, u64)> {
        let end = self.data.len() as u64;
        self.free.iter().copied().find(|(o, s)| o + s == end)
    }

    /// Release the name stored at `offset`, merging with adjacent free blocks.
    pub fn remove_name(&mut self, offset: u64) -> Result<(), FormatError> {
        let name_len = read_name(&self.data, offset)?.len();
        let mut block = (offset, pad8(name_len + 1) as u64);
        self.free.retain(|&(o, s)| {
            if o + s == block.0 {
                block = (o, s + block.1);
                false
            } else if block.0 + block.1 == o {
                block.1 += s;
                false
            } else {
                true
            }
        });
        self.free.push(block);
        self.free.sort_unstable();
        Ok(())
    }

    /// Name at `offset`.
    pub fn get(&self, offset: u64) -> Result<String, FormatError> {
        read_name(&self.data, offset)
    }

    pub fn data_segment_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Data segment with the free list threaded through the free blocks.
    pub fn serialize_data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        let ls = self.length_size as usize;
        let mut blocks = self.free.clone();
        blocks.sort_unstable();
        for (i, &(offset, size)) in blocks.iter().enumerate() {
            let next = blocks.get(i + 1).map_or(FREE_LIST_END, |b| b.0);
            let mut record = Vec::with_capacity(2 * ls);
            record.put_uint(next, ls);
            record.put_uint(size, ls);
            let start = offset as usize;
            data[start..start + 2 * ls].copy_from_slice(&record);
        }
        data
    }

    /// Header for a data segment placed at `data_segment_address`.
    pub fn header(&self, data_segment_address: u64) -> LocalHeap {
        let mut blocks = self.free.clone();
        blocks.sort_unstable();
        LocalHeap {
            data_segment_size: self.data.len() as u64,
            free_list_head_offset: blocks.first().map_or(FREE_LIST_END, |b| b.0),
            data_segment_address,
        }
    }

    /// Header immediately followed by the data segment, as one image placed
    /// at `address`.
    pub fn serialize(&self, address: u64) -> Vec<u8> {
        let header_len = LocalHeap::header_size(self.offset_size, self.length_size) as u64;
        let mut buf = self
            .header(address + header_len)
            .serialize(self.offset_size, self.length_size);
        buf.extend(self.serialize_data());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_heap_file(data_seg_offset: usize, strings: &[&str], os: u8, ls: u8) -> Vec<u8> {
        let mut data_seg = Vec::new();
        for s in strings {
            data_seg.extend_from_slice(s.as_bytes());
            data_seg.push(0);
        }
        let heap = LocalHeap {
            data_segment_size: data_seg.len() as u64,
            free_list_head_offset: FREE_LIST_END,
            data_segment_address: data_seg_offset as u64,
        };
        let mut file = heap.serialize(os, ls);
        file.resize(data_seg_offset, 0);
        file.extend(data_seg);
        file
    }

    #[test]
    fn parse_heap_header() {
        let file = build_heap_file(100, &["hello", "world"], 8, 8);
        let heap = LocalHeap::parse(&file, 0, 8, 8).unwrap();
        assert_eq!(heap.data_segment_address, 100);
        assert_eq!(heap.data_segment_size, 12);
        assert_eq!(heap.read_string(&file, 0).unwrap(), "hello");
        assert_eq!(heap.read_string(&file, 6).unwrap(), "world");
    }

    #[test]
    fn read_string_past_segment() {
        let file = build_heap_file(100, &["hi"], 8, 8);
        let heap = LocalHeap::parse(&file, 0, 8, 8).unwrap();
        let err = heap.read_string(&file, 100).unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedEof { .. }));
    }

    #[test]
    fn parse_heap_4byte_offsets() {
        let file = build_heap_file(80, &["test"], 4, 4);
        let heap = LocalHeap::parse(&file, 0, 4, 4).unwrap();
        assert_eq!(heap.data_segment_address, 80);
        assert_eq!(heap.read_string(&file, 0).unwrap(), "test");
    }

    #[test]
    fn bad_signature_and_version() {
        let mut file = build_heap_file(100, &["x"], 8, 8);
        file[4] = 1;
        assert_eq!(
            LocalHeap::parse(&file, 0, 8, 8).unwrap_err(),
            FormatError::InvalidLocalHeapVersion(1)
        );
        file[0] = b'X';
        assert_eq!(
            LocalHeap::parse(&file, 0, 8, 8).unwrap_err(),
            FormatError::InvalidLocalHeapSignature
        );
    }

    #[test]
    fn writer_aligns_and_grows() {
        let mut w = LocalHeapWriter::new(32, 8, 8);
        assert_eq!(w.add_name("a").unwrap(), 8);
        assert_eq!(w.add_name("dataset").unwrap(), 16);
        // segment is full now
        assert_eq!(w.data_segment_size(), 32);
        assert_eq!(w.add_name("longer_name").unwrap(), 24 + 8);
        assert_eq!(w.data_segment_size(), 64);
        assert_eq!(w.get(16).unwrap(), "dataset");
        assert_eq!(w.get(0).unwrap(), "");
    }

    #[test]
    fn writer_round_trips_through_file_image() {
        let mut w = LocalHeapWriter::new(88, 8, 8);
        let a = w.add_name("alpha").unwrap();
        let b = w.add_name("beta").unwrap();
        let image = w.serialize(0);
        let heap = LocalHeap::parse(&image, 0, 8, 8).unwrap();
        assert_eq!(heap.data_segment_address, 32);
        assert_eq!(heap.read_string(&image, a).unwrap(), "alpha");
        assert_eq!(heap.read_string(&image, b).unwrap(), "beta");
        assert_eq!(heap.free_blocks(&image, 8).unwrap(), vec![(24, 64)]);

        let mut again = LocalHeapWriter::from_existing(&heap, &image, 8, 8).unwrap();
        assert_eq!(again.add_name("gamma").unwrap(), 24);
    }

    #[test]
    fn removal_coalesces() {
        let mut w = LocalHeapWriter::new(64, 8, 8);
        let a = w.add_name("one").unwrap();
        let b = w.add_name("two").unwrap();
        w.remove_name(a).unwrap();
        w.remove_name(b).unwrap();
        assert_eq!(w.header(0).free_list_head_offset, 8);
        assert_eq!(w.free, vec![(8, 56)]);
    }
}
