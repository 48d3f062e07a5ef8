//! Bit-level integer, bit-field and floating-point conversion for arbitrary
//! HDF5 layouts (bit offset, precision window, pad bits, byte order).
//!
//! Elements up to 16 bytes are handled in a `u128`; wider fixed-point
//! values go through `num-bigint`.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};

use crate::datatype::{Datatype, DatatypeByteOrder, MantissaNorm};
use crate::error::FormatError;
use crate::value::{BitVector, Value};

fn mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Bytes in little-endian order regardless of the stored order.
fn to_le(bytes: &[u8], order: DatatypeByteOrder) -> Vec<u8> {
    let mut le = bytes.to_vec();
    if order == DatatypeByteOrder::BigEndian {
        le.reverse();
    }
    le
}

fn from_le(mut le: Vec<u8>, order: DatatypeByteOrder) -> Vec<u8> {
    if order == DatatypeByteOrder::BigEndian {
        le.reverse();
    }
    le
}

fn load(bytes: &[u8], order: DatatypeByteOrder) -> u128 {
    let fold = |acc: u128, (i, &b): (usize, &u8)| acc | (b as u128) << (8 * i);
    match order {
        DatatypeByteOrder::LittleEndian => bytes.iter().enumerate().fold(0, fold),
        DatatypeByteOrder::BigEndian => bytes.iter().rev().enumerate().fold(0, fold),
    }
}

fn set_bit_range(le: &mut [u8], from: u32, to: u32) {
    for i in from..to {
        le[(i / 8) as usize] |= 1 << (i % 8);
    }
}

fn get_bit(le: &[u8], i: u32) -> bool {
    le[(i / 8) as usize] >> (i % 8) & 1 == 1
}

/// Fill pad bits below `offset` and above `offset + precision`.
fn apply_pads(le: &mut [u8], offset: u32, precision: u32, lo_pad: bool, hi_pad: bool) {
    let total = le.len() as u32 * 8;
    if lo_pad {
        set_bit_range(le, 0, offset);
    }
    if hi_pad {
        set_bit_range(le, (offset + precision).min(total), total);
    }
}

/// Integer layout shared by fixed-point and time values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IntLayout {
    pub size: usize,
    pub order: DatatypeByteOrder,
    pub signed: bool,
    pub lo_pad: bool,
    pub hi_pad: bool,
    pub offset: u32,
    pub precision: u32,
}

impl IntLayout {
    pub fn of(dt: &Datatype) -> Option<Self> {
        match dt {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                lo_pad,
                hi_pad,
                bit_offset,
                bit_precision,
            } => Some(Self {
                size: *size as usize,
                order: *byte_order,
                signed: *signed,
                lo_pad: *lo_pad,
                hi_pad: *hi_pad,
                offset: *bit_offset as u32,
                precision: *bit_precision as u32,
            }),
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => Some(Self {
                size: *size as usize,
                order: *byte_order,
                signed: true,
                lo_pad: false,
                hi_pad: false,
                offset: 0,
                precision: *bit_precision as u32,
            }),
            _ => None,
        }
    }
}

/// Decode the precision window, sign-extending for signed layouts.
///
/// Layouts of up to 64 bits of precision yield `Int`/`UInt`; wider ones
/// always yield `BigInt`.
pub(crate) fn decode_int(l: &IntLayout, bytes: &[u8]) -> Value {
    if l.size > 16 {
        return decode_wide_int(l, bytes);
    }
    let raw = load(bytes, l.order);
    let window = raw >> l.offset & mask(l.precision);
    let negative = l.signed && l.precision > 0 && window >> (l.precision - 1) & 1 == 1;
    if l.precision <= 64 {
        if l.signed {
            let v = if negative {
                (window | !mask(l.precision)) as i128
            } else {
                window as i128
            };
            Value::Int(v as i64)
        } else {
            Value::UInt(window as u64)
        }
    } else if l.signed {
        let v = if negative {
            (window | !mask(l.precision)) as i128
        } else {
            window as i128
        };
        Value::BigInt(BigInt::from(v))
    } else {
        Value::BigInt(BigInt::from(window))
    }
}

fn decode_wide_int(l: &IntLayout, bytes: &[u8]) -> Value {
    let raw = BigUint::from_bytes_le(&to_le(bytes, l.order));
    let modulus = BigUint::one() << l.precision as usize;
    let window = (raw >> l.offset as usize) % &modulus;
    let negative = l.signed && window.bit(l.precision as u64 - 1);
    let value = if negative {
        BigInt::from_biguint(Sign::Plus, window) - BigInt::from_biguint(Sign::Plus, modulus)
    } else {
        BigInt::from_biguint(Sign::Plus, window)
    };
    Value::BigInt(value)
}

fn value_to_bigint(value: &Value) -> Result<BigInt, FormatError> {
    match value {
        Value::Int(v) => Ok(BigInt::from(*v)),
        Value::UInt(v) => Ok(BigInt::from(*v)),
        Value::BigInt(v) => Ok(v.clone()),
        other => Err(FormatError::ValueKindMismatch {
            expected: "integer",
            found: other.kind_name(),
        }),
    }
}

/// Encode an integer into the precision window, checking its range.
pub(crate) fn encode_int(l: &IntLayout, value: &Value) -> Result<Vec<u8>, FormatError> {
    let v = value_to_bigint(value)?;
    let p = l.precision as usize;
    let (min, max) = if l.signed {
        let half = BigInt::one() << (p - 1);
        (-half.clone(), half - 1)
    } else {
        (BigInt::zero(), (BigInt::one() << p) - 1)
    };
    if v < min || v > max {
        return Err(FormatError::ValueOutOfRange);
    }
    let twos = if v.sign() == Sign::Minus {
        v + (BigInt::one() << p)
    } else {
        v
    };
    let mut le = twos
        .to_biguint()
        .map(|u| (u << l.offset as usize).to_bytes_le())
        .unwrap_or_default();
    le.resize(l.size, 0);
    apply_pads(&mut le, l.offset, l.precision, l.lo_pad, l.hi_pad);
    Ok(from_le(le, l.order))
}

/// Fast path for native-width integers, bypassing `BigInt`.
pub(crate) fn encode_native_int(l: &IntLayout, value: &Value) -> Option<Vec<u8>> {
    if l.offset != 0 || l.lo_pad || l.hi_pad || l.precision as usize != l.size * 8 || l.size > 8 {
        return None;
    }
    let raw = match (value, l.signed) {
        (Value::Int(v), true) => {
            let shift = 64 - l.precision;
            if (v << shift) >> shift != *v {
                return None;
            }
            *v as u64
        }
        (Value::UInt(v), false) if l.precision == 64 || *v >> l.precision == 0 => *v,
        _ => return None,
    };
    Some(from_le(raw.to_le_bytes()[..l.size].to_vec(), l.order))
}

/// Bit-field layout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BitLayout {
    pub size: usize,
    pub order: DatatypeByteOrder,
    pub lo_pad: bool,
    pub hi_pad: bool,
    pub offset: u32,
    pub precision: u32,
}

impl BitLayout {
    pub fn of(dt: &Datatype) -> Option<Self> {
        match dt {
            Datatype::BitField {
                size,
                byte_order,
                lo_pad,
                hi_pad,
                bit_offset,
                bit_precision,
            } => Some(Self {
                size: *size as usize,
                order: *byte_order,
                lo_pad: *lo_pad,
                hi_pad: *hi_pad,
                offset: *bit_offset as u32,
                precision: *bit_precision as u32,
            }),
            _ => None,
        }
    }
}

pub(crate) fn decode_bits(l: &BitLayout, bytes: &[u8]) -> BitVector {
    let le = to_le(bytes, l.order);
    let mut bv = BitVector::zeros(l.precision as usize);
    for i in 0..l.precision {
        bv.set(i as usize, get_bit(&le, l.offset + i));
    }
    bv
}

pub(crate) fn encode_bits(l: &BitLayout, value: &Value) -> Result<Vec<u8>, FormatError> {
    let bv = match value {
        Value::Bits(bv) => bv.clone(),
        Value::UInt(v) => {
            if l.precision < 64 && *v >> l.precision != 0 {
                return Err(FormatError::ValueOutOfRange);
            }
            BitVector::from_u64(*v, l.precision as usize)
        }
        other => {
            return Err(FormatError::ValueKindMismatch {
                expected: "bits",
                found: other.kind_name(),
            })
        }
    };
    if bv.len() > l.precision as usize {
        return Err(FormatError::ValueOutOfRange);
    }
    let mut le = vec![0u8; l.size];
    for i in 0..bv.len() as u32 {
        if bv.get(i as usize) {
            set_bit_range(&mut le, l.offset + i, l.offset + i + 1);
        }
    }
    apply_pads(&mut le, l.offset, l.precision, l.lo_pad, l.hi_pad);
    Ok(from_le(le, l.order))
}

/// Floating-point layout with absolute bit positions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FloatLayout {
    pub size: usize,
    pub order: DatatypeByteOrder,
    pub lo_pad: bool,
    pub hi_pad: bool,
    pub internal_pad: bool,
    pub norm: MantissaNorm,
    pub sign_loc: u32,
    pub offset: u32,
    pub precision: u32,
    pub exp_loc: u32,
    pub exp_size: u32,
    pub mant_loc: u32,
    pub mant_size: u32,
    pub bias: i64,
}

impl FloatLayout {
    pub fn of(dt: &Datatype) -> Option<Self> {
        match dt {
            Datatype::FloatingPoint {
                size,
                byte_order,
                lo_pad,
                hi_pad,
                internal_pad,
                mantissa_norm,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => Some(Self {
                size: *size as usize,
                order: *byte_order,
                lo_pad: *lo_pad,
                hi_pad: *hi_pad,
                internal_pad: *internal_pad,
                norm: *mantissa_norm,
                sign_loc: *sign_location as u32,
                offset: *bit_offset as u32,
                precision: *bit_precision as u32,
                exp_loc: *exponent_location as u32,
                exp_size: *exponent_size as u32,
                mant_loc: *mantissa_location as u32,
                mant_size: *mantissa_size as u32,
                bias: *exponent_bias as i64,
            }),
            _ => None,
        }
    }
}

/// `x * 2^e` without relying on `std` float intrinsics.
pub(crate) fn ldexp(mut x: f64, mut e: i64) -> f64 {
    let two_1023 = f64::from_bits(0x7FE0_0000_0000_0000);
    let two_m1022 = f64::from_bits(0x0010_0000_0000_0000);
    while e > 1023 {
        x *= two_1023;
        e -= 1023;
        if x.is_infinite() {
            return x;
        }
    }
    while e < -1022 {
        x *= two_m1022;
        e += 1022;
        if x == 0.0 {
            return x;
        }
    }
    x * f64::from_bits(((e + 1023) as u64) << 52)
}

pub(crate) fn decode_float(l: &FloatLayout, bytes: &[u8]) -> Result<f64, FormatError> {
    if l.size > 16 {
        return Err(FormatError::UnsupportedWidth(l.size as u32));
    }
    let raw = load(bytes, l.order) & (mask(l.precision) << l.offset);
    let negative = raw >> l.sign_loc & 1 == 1;
    let exp = (raw >> l.exp_loc & mask(l.exp_size)) as u64;
    let mant = (raw >> l.mant_loc & mask(l.mant_size)) as u64;
    let exp_max = mask(l.exp_size) as u64;
    let ms = l.mant_size as i64;
    let magnitude = if exp == exp_max {
        let payload = match l.norm {
            MantissaNorm::MsbSet if ms > 0 => mant & !(1u64 << (ms - 1)),
            _ => mant,
        };
        if payload == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exp == 0 && mant == 0 {
        0.0
    } else {
        let e = exp as i64 - l.bias;
        match l.norm {
            MantissaNorm::Implied if exp == 0 => ldexp(mant as f64, 1 - l.bias - ms),
            MantissaNorm::Implied => ldexp(ldexp(1.0, ms) + mant as f64, e - ms),
            MantissaNorm::MsbSet => ldexp(mant as f64, e - (ms - 1)),
            MantissaNorm::None => ldexp(mant as f64, e - ms),
        }
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// Shift right by `shift` bits with round-half-to-even, or left if negative.
fn shift_round(v: u128, shift: i64) -> u128 {
    if shift <= 0 {
        return v << (-shift).min(127);
    }
    if shift >= 128 {
        return 0;
    }
    let q = v >> shift;
    let rem = v & mask(shift as u32);
    let half = 1u128 << (shift - 1);
    if rem > half || (rem == half && q & 1 == 1) {
        q + 1
    } else {
        q
    }
}

/// Split a positive finite non-zero `x` into `m * 2^(e - 52)` with
/// `m` in `[2^52, 2^53)`.
fn split(x: f64) -> (u128, i64) {
    let bits = x.to_bits();
    let exp_bits = ((bits >> 52) & 0x7FF) as i64;
    let frac = bits & ((1u64 << 52) - 1);
    if exp_bits == 0 {
        let lz = frac.leading_zeros() as i64 - 11;
        ((frac << lz) as u128, -1022 - lz)
    } else {
        ((frac | 1u64 << 52) as u128, exp_bits - 1023)
    }
}

pub(crate) fn encode_float(l: &FloatLayout, x: f64) -> Result<Vec<u8>, FormatError> {
    if l.size > 16 {
        return Err(FormatError::UnsupportedWidth(l.size as u32));
    }
    let ms = l.mant_size as i64;
    let exp_max = mask(l.exp_size) as i64;
    let mant_top = 1u128 << ms;
    let infinity = (exp_max, 0u128);
    let (exp_field, mant_field) = if x.is_nan() {
        let quiet = if ms > 0 { 1u128 << (ms - 1) } else { 0 };
        match l.norm {
            MantissaNorm::MsbSet if ms > 1 => (exp_max, quiet | 1u128 << (ms - 2)),
            _ => (exp_max, quiet),
        }
    } else if x.is_infinite() {
        infinity
    } else if x == 0.0 {
        (0, 0)
    } else {
        let (m, e) = split(x.abs());
        match l.norm {
            MantissaNorm::Implied => {
                let biased = e + l.bias;
                if biased >= 1 {
                    let mant = shift_round(m - (1u128 << 52), 52 - ms);
                    let (biased, mant) = if mant >= mant_top {
                        (biased + 1, 0)
                    } else {
                        (biased, mant)
                    };
                    if biased >= exp_max {
                        infinity
                    } else {
                        (biased, mant)
                    }
                } else {
                    let mant = shift_round(m, (52 - ms) + (1 - biased));
                    if mant >= mant_top {
                        (1, mant - mant_top)
                    } else {
                        (0, mant)
                    }
                }
            }
            MantissaNorm::MsbSet | MantissaNorm::None => {
                let biased = match l.norm {
                    MantissaNorm::MsbSet => e + l.bias,
                    _ => e + 1 + l.bias,
                };
                let mant = shift_round(m, 53 - ms);
                let (biased, mant) = if mant >= mant_top {
                    (biased + 1, mant >> 1)
                } else {
                    (biased, mant)
                };
                if biased >= exp_max {
                    infinity
                } else if biased < 0 {
                    (0, 0)
                } else {
                    (biased, mant)
                }
            }
        }
    };
    let sign = x.is_sign_negative() as u128;
    let raw = sign << l.sign_loc
        | (exp_field as u128 & mask(l.exp_size)) << l.exp_loc
        | (mant_field & mask(l.mant_size)) << l.mant_loc;
    let mut le = raw.to_le_bytes()[..l.size].to_vec();
    apply_pads(&mut le, l.offset, l.precision, l.lo_pad, l.hi_pad);
    if l.internal_pad {
        for i in l.offset..l.offset + l.precision {
            let in_field = i == l.sign_loc
                || (l.exp_loc..l.exp_loc + l.exp_size).contains(&i)
                || (l.mant_loc..l.mant_loc + l.mant_size).contains(&i);
            if !in_field {
                set_bit_range(&mut le, i, i + 1);
            }
        }
    }
    Ok(from_le(le, l.order))
}

/// Convert a decoded integer value to f64 for float encoding.
pub(crate) fn value_to_f64(value: &Value) -> Result<f64, FormatError> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        Value::UInt(v) => Ok(*v as f64),
        Value::BigInt(v) => v.to_f64().ok_or(FormatError::ValueOutOfRange),
        other => Err(FormatError::ValueKindMismatch {
            expected: "number",
            found: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_builders::{make_f16_type, make_f32_type, make_f64_type_with_order};

    fn int_layout(size: usize, signed: bool, offset: u32, precision: u32) -> IntLayout {
        IntLayout {
            size,
            order: DatatypeByteOrder::LittleEndian,
            signed,
            lo_pad: false,
            hi_pad: false,
            offset,
            precision,
        }
    }

    #[test]
    fn precision_window() {
        let byte = [0b0011_1100u8];
        assert_eq!(decode_int(&int_layout(1, false, 2, 4), &byte), Value::UInt(15));
        assert_eq!(decode_int(&int_layout(1, true, 2, 4), &byte), Value::Int(-1));
        assert_eq!(decode_int(&int_layout(1, true, 2, 4), &[0b0001_1100]), Value::Int(7));
    }

    #[test]
    fn int_encode_range_and_pads() {
        let mut l = int_layout(1, true, 2, 4);
        assert_eq!(encode_int(&l, &Value::Int(-1)).unwrap(), vec![0b0011_1100]);
        assert_eq!(encode_int(&l, &Value::Int(8)), Err(FormatError::ValueOutOfRange));
        assert_eq!(encode_int(&l, &Value::Int(-8)).unwrap(), vec![0b0010_0000]);
        l.lo_pad = true;
        l.hi_pad = true;
        assert_eq!(encode_int(&l, &Value::Int(0)).unwrap(), vec![0b1100_0011]);
    }

    #[test]
    fn big_endian_and_wide() {
        let mut l = int_layout(2, false, 0, 16);
        l.order = DatatypeByteOrder::BigEndian;
        assert_eq!(decode_int(&l, &[0x12, 0x34]), Value::UInt(0x1234));

        let wide = int_layout(16, true, 0, 128);
        let bytes = [0xFFu8; 16];
        assert_eq!(decode_int(&wide, &bytes), Value::BigInt(BigInt::from(-1)));

        let huge = int_layout(20, false, 0, 160);
        let mut bytes = vec![0u8; 20];
        bytes[19] = 0x80;
        let expected = BigInt::one() << 159usize;
        assert_eq!(decode_int(&huge, &bytes), Value::BigInt(expected.clone()));
        assert_eq!(encode_int(&huge, &Value::BigInt(expected)).unwrap(), bytes);
    }

    #[test]
    fn native_fast_path_agrees() {
        let l = int_layout(2, true, 0, 16);
        let v = Value::Int(-300);
        assert_eq!(encode_native_int(&l, &v), Some(encode_int(&l, &v).unwrap()));
        assert_eq!(encode_native_int(&l, &Value::Int(40000)), None);
    }

    fn f32_layout() -> FloatLayout {
        FloatLayout::of(&make_f32_type()).unwrap()
    }

    #[test]
    fn f32_specials() {
        let l = f32_layout();
        assert_eq!(decode_float(&l, &[0, 0, 0, 0]).unwrap().to_bits(), 0.0f64.to_bits());
        assert_eq!(decode_float(&l, &[0, 0, 0x80, 0x7F]).unwrap(), f64::INFINITY);
        assert_eq!(decode_float(&l, &[0, 0, 0x80, 0xFF]).unwrap(), f64::NEG_INFINITY);
        assert!(decode_float(&l, &[1, 0, 0x80, 0x7F]).unwrap().is_nan());
        let neg_zero = decode_float(&l, &[0, 0, 0, 0x80]).unwrap();
        assert!(neg_zero == 0.0 && neg_zero.is_sign_negative());
    }

    #[test]
    fn f32_matches_native() {
        let l = f32_layout();
        for x in [1.0f32, -2.5, 3.4028235e38, 1.1754944e-38, 1.0e-45, 0.1, 12345.678] {
            let bytes = x.to_le_bytes();
            assert_eq!(decode_float(&l, &bytes).unwrap(), x as f64);
            assert_eq!(encode_float(&l, x as f64).unwrap(), bytes.to_vec());
        }
    }

    #[test]
    fn f64_big_endian() {
        let l = FloatLayout::of(&make_f64_type_with_order(DatatypeByteOrder::BigEndian)).unwrap();
        let x = -1234.5e-300f64;
        assert_eq!(decode_float(&l, &x.to_be_bytes()).unwrap(), x);
        assert_eq!(encode_float(&l, x).unwrap(), x.to_be_bytes().to_vec());
        let tiny = f64::from_bits(1);
        assert_eq!(encode_float(&l, tiny).unwrap(), tiny.to_be_bytes().to_vec());
        assert_eq!(decode_float(&l, &tiny.to_be_bytes()).unwrap(), tiny);
    }

    #[test]
    fn f16_rounding_and_overflow() {
        let l = FloatLayout::of(&make_f16_type()).unwrap();
        assert_eq!(encode_float(&l, 1.0).unwrap(), vec![0x00, 0x3C]);
        assert_eq!(encode_float(&l, 65504.0).unwrap(), vec![0xFF, 0x7B]);
        assert_eq!(encode_float(&l, 1.0e6).unwrap(), vec![0x00, 0x7C]);
        // smallest subnormal 2^-24
        assert_eq!(decode_float(&l, &[0x01, 0x00]).unwrap(), ldexp(1.0, -24));
        assert_eq!(encode_float(&l, ldexp(1.0, -24)).unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn ldexp_extremes() {
        assert_eq!(ldexp(1.0, 0), 1.0);
        assert_eq!(ldexp(1.0, -1074), f64::from_bits(1));
        assert_eq!(ldexp(1.0, 2000), f64::INFINITY);
        assert_eq!(ldexp(3.0, 4), 48.0);
    }

    #[test]
    fn bitfield_window() {
        let l = BitLayout {
            size: 1,
            order: DatatypeByteOrder::LittleEndian,
            lo_pad: false,
            hi_pad: true,
            offset: 1,
            precision: 3,
        };
        let bv = decode_bits(&l, &[0b1111_0101]);
        assert_eq!(bv.to_u64(), 0b010);
        assert_eq!(encode_bits(&l, &Value::Bits(bv)).unwrap(), vec![0b1111_0100]);
        assert_eq!(encode_bits(&l, &Value::UInt(9)), Err(FormatError::ValueOutOfRange));
    }
}
