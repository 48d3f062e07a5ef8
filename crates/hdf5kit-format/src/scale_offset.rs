//! Scale-offset filter (id 6).
//!
//! Each chunk is stored as a 21-byte header followed by the offsets of every
//! element from the chunk minimum, packed least significant bit first in
//! `minbits` bits each:
//!
//! ```text
//! minbits: u32 LE | 8u8 | minval: u64 LE | 8 reserved bytes | packed offsets
//! ```
//!
//! When a fill value is defined it is not counted towards the range and is
//! written as the all-ones pattern of `minbits` bits. `minbits == 0` means
//! every element equals `minval`; `minbits` equal to the element width means
//! the payload is the unmodified element bytes.
//!
//! Integer mode is lossless. Floating-point D-scale mode multiplies
//! `value - min` by `10^scale_factor` and rounds, so it keeps `scale_factor`
//! decimal digits.

#[cfg(not(feature = "std"))]
use alloc::{format, vec, vec::Vec};

use num_traits::float::FloatCore;

use crate::bytes::{ByteCursor, ByteWriter};
use crate::error::FormatError;

const HEADER_SIZE: usize = 21;
const MIN_PARAMS: usize = 8;

/// Scale type from client data word 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Floating point, decimal scale factor.
    FloatDScale,
    /// Floating point, binary exponent scale (not implemented by HDF5 either).
    FloatEScale,
    /// Integer, scale factor is a fixed `minbits` (0 = compute).
    Integer,
}

impl ScaleMode {
    fn from_word(word: u32) -> Result<Self, FormatError> {
        match word {
            0 => Ok(ScaleMode::FloatDScale),
            1 => Ok(ScaleMode::FloatEScale),
            2 => Ok(ScaleMode::Integer),
            _ => Err(FormatError::FilterError(format!(
                "scaleoffset: unknown scale type {word}"
            ))),
        }
    }

    fn word(self) -> u32 {
        match self {
            ScaleMode::FloatDScale => 0,
            ScaleMode::FloatEScale => 1,
            ScaleMode::Integer => 2,
        }
    }
}

/// Parameters from the filter's client data:
/// `[scale type, scale factor, element count, class (0 int / 1 float),
/// element size, signed, byte order (0 LE / 1 BE), fill defined, fill value...]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleOffsetParams {
    pub mode: ScaleMode,
    pub scale_factor: i32,
    pub element_count: u32,
    pub element_size: u32,
    pub signed: bool,
    pub big_endian: bool,
    /// Fill value as the element's numeric bit pattern.
    pub fill: Option<u64>,
}

impl ScaleOffsetParams {
    pub fn integer(element_size: u32, signed: bool, element_count: u32) -> Self {
        Self {
            mode: ScaleMode::Integer,
            scale_factor: 0,
            element_count,
            element_size,
            signed,
            big_endian: false,
            fill: None,
        }
    }

    /// Floating-point D-scale keeping `digits` decimal digits.
    pub fn float_dscale(element_size: u32, digits: i32, element_count: u32) -> Self {
        Self {
            mode: ScaleMode::FloatDScale,
            scale_factor: digits,
            element_count,
            element_size,
            signed: true,
            big_endian: false,
            fill: None,
        }
    }

    pub fn with_fill(mut self, fill: u64) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn from_client_data(cd: &[u32]) -> Result<Self, FormatError> {
        if cd.len() < MIN_PARAMS {
            return Err(FormatError::FilterError(format!(
                "scaleoffset: expected at least {MIN_PARAMS} client data values, got {}",
                cd.len()
            )));
        }
        let mode = ScaleMode::from_word(cd[0])?;
        let is_float = cd[3] == 1;
        let fill = if cd[7] == 1 {
            let bytes: Vec<u8> = cd[8..].iter().take(2).flat_map(|w| w.to_le_bytes()).collect();
            let mut raw = [0u8; 8];
            let n = bytes.len().min(cd[4] as usize).min(8);
            raw[..n].copy_from_slice(&bytes[..n]);
            Some(u64::from_le_bytes(raw))
        } else {
            None
        };
        let params = Self {
            mode,
            scale_factor: cd[1] as i32,
            element_count: cd[2],
            element_size: cd[4],
            signed: cd[5] != 0,
            big_endian: cd[6] != 0,
            fill,
        };
        params.validate(is_float)?;
        Ok(params)
    }

    pub fn to_client_data(&self) -> Vec<u32> {
        let mut cd = vec![
            self.mode.word(),
            self.scale_factor as u32,
            self.element_count,
            (self.mode != ScaleMode::Integer) as u32,
            self.element_size,
            self.signed as u32,
            self.big_endian as u32,
            self.fill.is_some() as u32,
        ];
        if let Some(fill) = self.fill {
            cd.push(fill as u32);
            if self.element_size > 4 {
                cd.push((fill >> 32) as u32);
            }
        }
        cd
    }

    fn validate(&self, is_float: bool) -> Result<(), FormatError> {
        match self.mode {
            ScaleMode::FloatEScale => {
                return Err(FormatError::FilterError(
                    "scaleoffset: E-scale is not supported".into(),
                ))
            }
            ScaleMode::FloatDScale if !is_float || !matches!(self.element_size, 4 | 8) => {
                return Err(FormatError::FilterError(format!(
                    "scaleoffset: D-scale needs a 4- or 8-byte float, got {} bytes",
                    self.element_size
                )))
            }
            ScaleMode::Integer if is_float => {
                return Err(FormatError::FilterError(
                    "scaleoffset: integer scale type on float data".into(),
                ))
            }
            _ => {}
        }
        if !(1..=8).contains(&self.element_size) {
            return Err(FormatError::UnsupportedWidth(self.element_size));
        }
        Ok(())
    }

    fn full_bits(&self) -> u32 {
        self.element_size * 8
    }

    fn read_raw(&self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, (i, b): (usize, &u8)| acc | (*b as u64) << (8 * i);
        if self.big_endian {
            bytes.iter().rev().enumerate().fold(0, fold)
        } else {
            bytes.iter().enumerate().fold(0, fold)
        }
    }

    fn write_raw(&self, raw: u64, out: &mut Vec<u8>) {
        let size = self.element_size as usize;
        let le = raw.to_le_bytes();
        if self.big_endian {
            out.extend(le[..size].iter().rev());
        } else {
            out.extend_from_slice(&le[..size]);
        }
    }

    fn int_value(&self, raw: u64) -> i128 {
        let bits = self.full_bits();
        if self.signed && bits < 64 && raw >> (bits - 1) & 1 == 1 {
            (raw | u64::MAX << bits) as i64 as i128
        } else if self.signed {
            raw as i64 as i128
        } else {
            raw as i128
        }
    }

    fn float_value(&self, raw: u64) -> f64 {
        if self.element_size == 4 {
            f32::from_bits(raw as u32) as f64
        } else {
            f64::from_bits(raw)
        }
    }

    fn float_raw(&self, value: f64) -> u64 {
        if self.element_size == 4 {
            (value as f32).to_bits() as u64
        } else {
            value.to_bits()
        }
    }

    fn scale(&self) -> f64 {
        FloatCore::powi(10.0f64, self.scale_factor)
    }

    /// Bits needed for `range + 1` distinct offsets plus the fill pattern.
    fn minbits_for(&self, range: u128) -> u32 {
        let values = range + 1 + self.fill.is_some() as u128;
        let bits = if values <= 1 {
            0
        } else {
            128 - (values - 1).leading_zeros()
        };
        bits.min(self.full_bits())
    }

    /// Pack a chunk (write direction).
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, FormatError> {
        let size = self.element_size as usize;
        if data.len() % size != 0 {
            return Err(FormatError::FilterError(
                "scaleoffset: data length not a multiple of element size".into(),
            ));
        }
        let raws: Vec<u64> = data.chunks_exact(size).map(|e| self.read_raw(e)).collect();
        let live = |raw: &&u64| self.fill != Some(**raw);

        let (minbits, minval, offsets) = match self.mode {
            ScaleMode::Integer => {
                let bounds = raws.iter().filter(live).map(|&r| self.int_value(r)).fold(
                    None,
                    |acc: Option<(i128, i128)>, v| match acc {
                        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                        None => Some((v, v)),
                    },
                );
                match bounds {
                    Some((min, max)) => {
                        let minbits = if self.scale_factor > 0 {
                            (self.scale_factor as u32).min(self.full_bits())
                        } else {
                            self.minbits_for((max - min) as u128)
                        };
                        let offsets = raws
                            .iter()
                            .map(|&r| {
                                (self.fill != Some(r)).then(|| (self.int_value(r) - min) as u64)
                            })
                            .collect::<Vec<_>>();
                        (minbits, min as u64, offsets)
                    }
                    None => (0, self.int_value(self.fill.unwrap_or(0)) as u64, Vec::new()),
                }
            }
            ScaleMode::FloatDScale => {
                let min = raws
                    .iter()
                    .filter(live)
                    .map(|&r| self.float_value(r))
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))));
                match min {
                    Some(min) => {
                        let scale = self.scale();
                        let offsets: Vec<Option<u64>> = raws
                            .iter()
                            .map(|&r| {
                                (self.fill != Some(r)).then(|| {
                                    FloatCore::round((self.float_value(r) - min) * scale).max(0.0)
                                        as u64
                                })
                            })
                            .collect();
                        let range = offsets.iter().flatten().copied().max().unwrap_or(0);
                        (self.minbits_for(range as u128), self.float_raw(min), offsets)
                    }
                    None => (0, self.fill.unwrap_or(0), Vec::new()),
                }
            }
            ScaleMode::FloatEScale => {
                return Err(FormatError::FilterError(
                    "scaleoffset: E-scale is not supported".into(),
                ))
            }
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + data.len());
        out.put_u32(minbits);
        out.put_u8(8);
        out.put_u64(minval);
        out.put_zeros(8);

        if minbits == self.full_bits() {
            out.extend_from_slice(data);
        } else if minbits > 0 {
            let fill_pattern = low_mask(minbits);
            let mut writer = LsbWriter::new(&mut out);
            for offset in &offsets {
                writer.put(offset.unwrap_or(fill_pattern) & fill_pattern, minbits);
            }
            writer.finish();
            let payload = raws.len() * minbits as usize / 8 + 1;
            out.resize(HEADER_SIZE + payload, 0);
        }
        log::trace!(
            "scaleoffset: {} elements packed to {minbits} bits ({} bytes)",
            raws.len(),
            out.len()
        );
        Ok(out)
    }

    /// Unpack a chunk (read direction).
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, FormatError> {
        let mut c = ByteCursor::new(data);
        let minbits = c.u32()?;
        c.skip(1)?;
        let minval = c.u64()?;
        c.skip(8)?;
        let payload = &data[HEADER_SIZE..];
        let size = self.element_size as usize;
        let full = self.full_bits();

        if minbits > full {
            return Err(FormatError::FilterError(format!(
                "scaleoffset: minbits {minbits} exceeds {full}-bit elements"
            )));
        }
        if minbits == full {
            let len = match self.element_count as usize {
                0 => payload.len() - payload.len() % size,
                n => n * size,
            };
            return payload
                .get(..len)
                .map(<[u8]>::to_vec)
                .ok_or(FormatError::UnexpectedEof {
                    expected: len,
                    available: payload.len(),
                });
        }

        let count = self.element_count as usize;
        let needed = (count * minbits as usize).div_ceil(8);
        if payload.len() < needed {
            return Err(FormatError::UnexpectedEof {
                expected: needed,
                available: payload.len(),
            });
        }

        let fill_pattern = low_mask(minbits);
        let mut reader = LsbReader::new(payload);
        let mut out = Vec::with_capacity(count * size);
        for _ in 0..count {
            let offset = reader.get(minbits);
            let raw = match self.fill {
                Some(fill) if minbits > 0 && offset == fill_pattern => fill,
                _ => self.restore(minval, offset),
            };
            self.write_raw(raw, &mut out);
        }
        Ok(out)
    }

    fn restore(&self, minval: u64, offset: u64) -> u64 {
        match self.mode {
            ScaleMode::Integer => {
                let min = if self.signed {
                    minval as i64 as i128
                } else {
                    minval as i128
                };
                (min + offset as i128) as u64
            }
            _ => {
                let min = self.float_value(minval);
                self.float_raw(min + offset as f64 / self.scale())
            }
        }
    }
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Appends values least significant bit first.
struct LsbWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u128,
    pending: u32,
}

impl<'a> LsbWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            acc: 0,
            pending: 0,
        }
    }

    fn put(&mut self, value: u64, bits: u32) {
        self.acc |= (value as u128) << self.pending;
        self.pending += bits;
        while self.pending >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.pending -= 8;
        }
    }

    fn finish(self) {
        if self.pending > 0 {
            self.out.push(self.acc as u8);
        }
    }
}

struct LsbReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> LsbReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn get(&mut self, bits: u32) -> u64 {
        let mut value = 0u64;
        for i in 0..bits {
            let byte = self.data.get(self.bit / 8).copied().unwrap_or(0);
            value |= ((byte >> (self.bit % 8) & 1) as u64) << i;
            self.bit += 1;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32_bytes(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn integer_header_and_round_trip() {
        let data = i32_bytes(&[100, 105, 103, 110, 101]);
        let p = ScaleOffsetParams::integer(4, true, 5);
        let packed = p.compress(&data).unwrap();
        // range 10 -> 11 values -> 4 bits
        assert_eq!(u32::from_le_bytes(packed[0..4].try_into().unwrap()), 4);
        assert_eq!(packed[4], 8);
        assert_eq!(u64::from_le_bytes(packed[5..13].try_into().unwrap()), 100);
        assert_eq!(packed.len(), HEADER_SIZE + 5 * 4 / 8 + 1);
        // first offsets 0 and 5, LSB first
        assert_eq!(packed[HEADER_SIZE], 0x50);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn negative_minimum() {
        let data = i32_bytes(&[-7, 3, -1000, 250, 0]);
        let p = ScaleOffsetParams::integer(4, true, 5);
        assert_eq!(p.decompress(&p.compress(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn fill_value_round_trips() {
        let data = i32_bytes(&[-1, 20, 21, -1, 23]);
        let p = ScaleOffsetParams::integer(4, true, 5).with_fill(u32::MAX as u64);
        let packed = p.compress(&data).unwrap();
        // range 3 + fill -> 5 values -> 3 bits
        assert_eq!(packed[0], 3);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn constant_chunk_has_no_payload() {
        let data: Vec<u8> = [42u16; 16].iter().flat_map(|v| v.to_le_bytes()).collect();
        let p = ScaleOffsetParams::integer(2, false, 16);
        let packed = p.compress(&data).unwrap();
        assert_eq!(packed.len(), HEADER_SIZE);
        assert_eq!(packed[0], 0);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn full_range_stored_raw() {
        let data = vec![0u8, 255, 17, 200];
        let p = ScaleOffsetParams::integer(1, false, 4);
        let packed = p.compress(&data).unwrap();
        assert_eq!(packed[0], 8);
        assert_eq!(&packed[HEADER_SIZE..], &data[..]);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn fixed_minbits_from_scale_factor() {
        let data = i32_bytes(&[0, 1, 2, 3]);
        let mut p = ScaleOffsetParams::integer(4, false, 4);
        p.scale_factor = 6;
        let packed = p.compress(&data).unwrap();
        assert_eq!(packed[0], 6);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn big_endian_unsigned() {
        let mut p = ScaleOffsetParams::integer(2, false, 3);
        p.big_endian = true;
        let data = vec![0x10, 0x00, 0x10, 0x07, 0x10, 0x03];
        let packed = p.compress(&data).unwrap();
        assert_eq!(u64::from_le_bytes(packed[5..13].try_into().unwrap()), 0x1000);
        assert_eq!(p.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn float_dscale_keeps_decimal_digits() {
        let values = [1.25f64, 2.5, 3.75, 1.3333];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let p = ScaleOffsetParams::float_dscale(8, 2, 4);
        let packed = p.compress(&data).unwrap();
        assert_eq!(f64::from_bits(u64::from_le_bytes(packed[5..13].try_into().unwrap())), 1.25);
        let out = p.decompress(&packed).unwrap();
        for (chunk, expected) in out.chunks_exact(8).zip(values) {
            let got = f64::from_le_bytes(chunk.try_into().unwrap());
            assert!((got - expected).abs() <= 0.005, "{got} vs {expected}");
        }
    }

    #[test]
    fn float32_dscale() {
        let values = [-0.5f32, 0.25, 10.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let p = ScaleOffsetParams::float_dscale(4, 1, 3);
        let out = p.decompress(&p.compress(&data).unwrap()).unwrap();
        let got: Vec<f32> = out
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert!((got[0] + 0.5).abs() < 0.06);
        assert!((got[1] - 0.25).abs() < 0.06);
        assert!((got[2] - 10.0).abs() < 0.06);
    }

    #[test]
    fn client_data_parse() {
        let p = ScaleOffsetParams::integer(4, true, 64).with_fill(0xFFFF_FFFF);
        assert_eq!(ScaleOffsetParams::from_client_data(&p.to_client_data()).unwrap(), p);
        assert!(ScaleOffsetParams::from_client_data(&[1, 0, 4, 1, 4, 1, 0, 0]).is_err());
        assert!(ScaleOffsetParams::from_client_data(&[0, 2, 4, 0, 4, 1, 0, 0]).is_err());
        assert!(ScaleOffsetParams::from_client_data(&[2, 0, 4]).is_err());
    }

    #[test]
    fn truncated_payload() {
        let p = ScaleOffsetParams::integer(4, false, 100);
        let packed = p.compress(&i32_bytes(&[1, 2, 3])).unwrap();
        assert!(matches!(
            p.decompress(&packed),
            Err(FormatError::UnexpectedEof { .. })
        ));
        assert!(p.decompress(&packed[..10]).is_err());
    }
}
