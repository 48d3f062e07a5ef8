//! Bounds-checked byte cursor and little-endian writer helpers shared by
//! every structure parser.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Address value meaning "no address" (all bits set).
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Returns true if `addr` is the undefined address for the given width.
pub fn is_undefined(addr: u64, offset_size: u8) -> bool {
    match offset_size {
        8 => addr == u64::MAX,
        n => addr == (1u64 << (u32::from(n) * 8)) - 1,
    }
}

/// Returns an error unless `data[pos..pos + needed]` is in range.
pub fn ensure_len(data: &[u8], pos: usize, needed: usize) -> Result<(), FormatError> {
    match pos.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: pos.saturating_add(needed),
            available: data.len(),
        }),
    }
}

/// Round `n` up to the next multiple of 8.
pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Sequential reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Cursor positioned at `pos`; fails if `pos` is past the end.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self, FormatError> {
        ensure_len(data, pos, 0)?;
        Ok(Self { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), FormatError> {
        ensure_len(self.data, pos, 0)?;
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        ensure_len(self.data, self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    /// Advance to the next multiple of `align` relative to `base`.
    pub fn align_from(&mut self, base: usize, align: usize) -> Result<(), FormatError> {
        let rel = self.pos - base;
        let padded = rel.div_ceil(align) * align;
        self.skip(padded - rel)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        ensure_len(self.data, self.pos, n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn signature(&mut self) -> Result<[u8; 4], FormatError> {
        let s = self.take(4)?;
        Ok([s[0], s[1], s[2], s[3]])
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn u16_be(&mut self) -> Result<u16, FormatError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn u32_be(&mut self) -> Result<u32, FormatError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    /// Little-endian unsigned integer of 1 to 8 bytes.
    pub fn uint(&mut self, width: usize) -> Result<u64, FormatError> {
        if width == 0 || width > 8 {
            return Err(FormatError::InvalidLengthSize(width as u8));
        }
        Ok(LittleEndian::read_uint(self.take(width)?, width))
    }

    /// File address of `size` bytes (2, 4, or 8).
    pub fn offset(&mut self, size: u8) -> Result<u64, FormatError> {
        match size {
            2 | 4 | 8 => self.uint(size as usize),
            _ => Err(FormatError::InvalidOffsetSize(size)),
        }
    }

    /// File address, with the undefined address mapped to `None`.
    pub fn optional_offset(&mut self, size: u8) -> Result<Option<u64>, FormatError> {
        let addr = self.offset(size)?;
        Ok(if is_undefined(addr, size) { None } else { Some(addr) })
    }

    /// Length field of `size` bytes (2, 4, or 8).
    pub fn length(&mut self, size: u8) -> Result<u64, FormatError> {
        match size {
            2 | 4 | 8 => self.uint(size as usize),
            _ => Err(FormatError::InvalidLengthSize(size)),
        }
    }

    /// Null-terminated string; consumes the terminator.
    pub fn c_string(&mut self) -> Result<&'a [u8], FormatError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnexpectedEof {
                expected: self.data.len() + 1,
                available: self.data.len(),
            })?;
        let s = &rest[..end];
        self.pos += end + 1;
        Ok(s)
    }
}

/// Little-endian append helpers for serializers.
pub trait ByteWriter {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    /// Unsigned integer in `width` bytes (1 to 8).
    fn put_uint(&mut self, v: u64, width: usize);
    fn put_zeros(&mut self, n: usize);
    /// Zero bytes until the length (relative to `base`) is a multiple of `align`.
    fn pad_to(&mut self, base: usize, align: usize);
}

impl ByteWriter for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_uint(&mut self, v: u64, width: usize) {
        self.extend_from_slice(&v.to_le_bytes()[..width]);
    }

    fn put_zeros(&mut self, n: usize) {
        self.resize(self.len() + n, 0);
    }

    fn pad_to(&mut self, base: usize, align: usize) {
        let rel = self.len() - base;
        let padded = rel.div_ceil(align) * align;
        self.put_zeros(padded - rel);
    }
}

/// Minimum number of bytes needed to store `n`, at least 1.
pub fn bytes_needed(n: u64) -> usize {
    if n == 0 {
        1
    } else {
        (64 - n.leading_zeros() as usize).div_ceil(8)
    }
}
