//! N-bit filter (id 5): packs the significant bit window of each integer
//! element, most significant bit first, with no padding between elements.

#[cfg(not(feature = "std"))]
use alloc::{format, vec, vec::Vec};

use crate::error::FormatError;

/// Parameters from the filter's client data:
/// `[nparms, reserved, element count, signed, element size, byte order,
/// precision, bit offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NBitParams {
    /// Elements per chunk (0 = infer from the input length on write).
    pub element_count: u32,
    pub signed: bool,
    /// Element size in bytes (1 to 8).
    pub element_size: u32,
    pub big_endian: bool,
    /// Significant bits per element.
    pub precision: u32,
    /// Bit position of the least significant significant bit.
    pub offset: u32,
}

const NBIT_PARAMS: u32 = 8;

impl NBitParams {
    pub fn from_client_data(cd: &[u32]) -> Result<Self, FormatError> {
        if cd.len() < NBIT_PARAMS as usize {
            return Err(FormatError::FilterError(format!(
                "nbit: expected {NBIT_PARAMS} client data values, got {}",
                cd.len()
            )));
        }
        let params = Self {
            element_count: cd[2],
            signed: cd[3] != 0,
            element_size: cd[4],
            big_endian: cd[5] != 0,
            precision: cd[6],
            offset: cd[7],
        };
        params.validate()?;
        Ok(params)
    }

    pub fn to_client_data(&self) -> Vec<u32> {
        vec![
            NBIT_PARAMS,
            0,
            self.element_count,
            self.signed as u32,
            self.element_size,
            self.big_endian as u32,
            self.precision,
            self.offset,
        ]
    }

    fn validate(&self) -> Result<(), FormatError> {
        let bits = self.element_size * 8;
        if !(1..=8).contains(&self.element_size)
            || self.precision == 0
            || self.offset + self.precision > bits
        {
            return Err(FormatError::FilterError(format!(
                "nbit: precision {} at offset {} does not fit a {}-byte element",
                self.precision, self.offset, self.element_size
            )));
        }
        Ok(())
    }

    fn read_element(&self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, (i, b): (usize, &u8)| acc | (*b as u64) << (8 * i);
        if self.big_endian {
            bytes.iter().rev().enumerate().fold(0, fold)
        } else {
            bytes.iter().enumerate().fold(0, fold)
        }
    }

    fn write_element(&self, value: u64, out: &mut Vec<u8>) {
        let size = self.element_size as usize;
        let le = value.to_le_bytes();
        if self.big_endian {
            out.extend(le[..size].iter().rev());
        } else {
            out.extend_from_slice(&le[..size]);
        }
    }

    fn window_mask(&self) -> u64 {
        if self.precision >= 64 {
            u64::MAX
        } else {
            (1u64 << self.precision) - 1
        }
    }

    /// Pack each element's window (write direction).
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, FormatError> {
        let size = self.element_size as usize;
        if data.len() % size != 0 {
            return Err(FormatError::FilterError(
                "nbit: data length not a multiple of element size".into(),
            ));
        }
        let mask = self.window_mask();
        let mut writer = MsbWriter::with_capacity(data.len());
        for element in data.chunks_exact(size) {
            writer.put((self.read_element(element) >> self.offset) & mask, self.precision);
        }
        Ok(writer.finish())
    }

    /// Unpack `element_count` elements, sign-extending signed windows.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, FormatError> {
        let count = self.element_count as usize;
        let needed = (count * self.precision as usize).div_ceil(8);
        if data.len() < needed {
            return Err(FormatError::FilterError(format!(
                "nbit: {} packed bytes, {needed} needed for {count} elements",
                data.len()
            )));
        }
        let top = self.offset + self.precision;
        let mut reader = MsbReader::new(data);
        let mut out = Vec::with_capacity(count * self.element_size as usize);
        for _ in 0..count {
            let window = reader.get(self.precision);
            let mut value = window << self.offset;
            if self.signed && window >> (self.precision - 1) & 1 == 1 && top < 64 {
                value |= u64::MAX << top;
            }
            self.write_element(value, &mut out);
        }
        Ok(out)
    }
}

/// Bit sink filling each byte from its most significant bit down.
struct MsbWriter {
    out: Vec<u8>,
    used: u32,
}

impl MsbWriter {
    fn with_capacity(n: usize) -> Self {
        Self {
            out: Vec::with_capacity(n),
            used: 8,
        }
    }

    fn put(&mut self, value: u64, bits: u32) {
        for i in (0..bits).rev() {
            if self.used == 8 {
                self.out.push(0);
                self.used = 0;
            }
            if value >> i & 1 == 1 {
                if let Some(last) = self.out.last_mut() {
                    *last |= 0x80 >> self.used;
                }
            }
            self.used += 1;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

struct MsbReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> MsbReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn get(&mut self, bits: u32) -> u64 {
        let mut value = 0u64;
        for _ in 0..bits {
            let byte = self.data.get(self.bit / 8).copied().unwrap_or(0);
            value = value << 1 | (byte >> (7 - self.bit % 8) & 1) as u64;
            self.bit += 1;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(signed: bool, size: u32, precision: u32, offset: u32, count: u32) -> NBitParams {
        NBitParams {
            element_count: count,
            signed,
            element_size: size,
            big_endian: false,
            precision,
            offset,
        }
    }

    #[test]
    fn packs_msb_first() {
        // three 4-bit values 0xA, 0x3, 0xF -> 1010 0011 1111 0000
        let p = params(false, 1, 4, 0, 3);
        let packed = p.compress(&[0x0A, 0x03, 0x0F]).unwrap();
        assert_eq!(packed, [0xA3, 0xF0]);
        assert_eq!(p.decompress(&packed).unwrap(), [0x0A, 0x03, 0x0F]);
    }

    #[test]
    fn signed_round_trip_with_offset() {
        // 12-bit signed values stored at bit offset 2 of an i32
        let p = params(true, 4, 12, 2, 5);
        let values: [i32; 5] = [0, 1, -1, 2047, -2048];
        let data: Vec<u8> = values.iter().flat_map(|v| (v << 2).to_le_bytes()).collect();
        let packed = p.compress(&data).unwrap();
        assert_eq!(packed.len(), (5 * 12usize).div_ceil(8));
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn big_endian_elements() {
        let mut p = params(false, 2, 10, 0, 3);
        p.big_endian = true;
        let data = [0x03, 0xFF, 0x00, 0x01, 0x02, 0x00];
        let packed = p.compress(&data).unwrap();
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn client_data_round_trip_and_validation() {
        let p = params(true, 4, 20, 4, 100);
        assert_eq!(NBitParams::from_client_data(&p.to_client_data()).unwrap(), p);
        assert!(NBitParams::from_client_data(&[8, 0, 1, 0, 1, 0, 9, 0]).is_err());
        assert!(NBitParams::from_client_data(&[8, 0]).is_err());
    }

    #[test]
    fn short_input_rejected() {
        let p = params(false, 2, 16, 0, 4);
        assert!(p.decompress(&[0; 7]).is_err());
    }
}
