//! Decoded values: the closed set of representations the codec produces
//! and accepts.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use core::fmt;

use num_bigint::BigInt;

use crate::reference::{ObjectLocation, Reference};

/// A packed bit vector of `len` bits, least significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitVector {
    len: usize,
    bytes: Vec<u8>,
}

impl BitVector {
    /// All-zero vector of `len` bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0; len.div_ceil(8)],
        }
    }

    /// Vector of the low `len` bits of `value`.
    pub fn from_u64(value: u64, len: usize) -> Self {
        let mut bv = Self::zeros(len);
        for i in 0..len.min(64) {
            bv.set(i, value >> i & 1 == 1);
        }
        bv
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, i: usize) -> bool {
        i < self.len && self.bytes[i / 8] >> (i % 8) & 1 == 1
    }

    pub fn set(&mut self, i: usize, bit: bool) {
        if i >= self.len {
            return;
        }
        if bit {
            self.bytes[i / 8] |= 1 << (i % 8);
        } else {
            self.bytes[i / 8] &= !(1 << (i % 8));
        }
    }

    /// Low 64 bits as an integer.
    pub fn to_u64(&self) -> u64 {
        (0..self.len.min(64)).fold(0, |acc, i| acc | (self.get(i) as u64) << i)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.len).rev() {
            f.write_str(if self.get(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer that fits in 64 bits.
    Int(i64),
    /// Unsigned integer that fits in 64 bits.
    UInt(u64),
    /// Integer wider than 64 bits.
    BigInt(BigInt),
    Float(f64),
    String(String),
    Bits(BitVector),
    /// Opaque bytes.
    Blob(Vec<u8>),
    /// Compound members in declaration order.
    Compound(Vec<(String, Value)>),
    Reference {
        reference: Reference,
        /// Set when an object locator resolved the target.
        target: Option<ObjectLocation>,
    },
    /// Enum member name (or the configured sentinel).
    Enum(String),
    /// Variable-length sequence.
    Sequence(Vec<Value>),
    /// Fixed-size array, flattened in row-major order.
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bits(_) => "bits",
            Value::Blob(_) => "blob",
            Value::Compound(_) => "compound",
            Value::Reference { .. } => "reference",
            Value::Enum(_) => "enum",
            Value::Sequence(_) => "sequence",
            Value::Array(_) => "array",
        }
    }

    /// Integer value as i64, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::BigInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Integer value as u64, if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::UInt(v) => Some(*v),
            Value::BigInt(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Numeric value as f64 (integers are converted).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_members(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Compound(m) => Some(m),
            _ => None,
        }
    }

    /// Elements of a sequence or array.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(v) | Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Named member of a compound value.
    pub fn member(&self, name: &str) -> Option<&Value> {
        self.as_members()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) | Value::Enum(s) => f.write_str(s),
            Value::Bits(b) => write!(f, "0b{b}"),
            Value::Blob(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Compound(members) => {
                f.write_str("{")?;
                for (i, (name, v)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={v}")?;
                }
                f.write_str("}")
            }
            Value::Reference { reference, target } => match target.as_ref().and_then(|t| t.path.as_deref()) {
                Some(path) => write!(f, "{} -> {path}", reference.kind_name()),
                None => write!(f, "{} @{:#x}", reference.kind_name(), reference.address()),
            },
            Value::Sequence(items) | Value::Array(items) => write_list(f, items),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitvector_ops() {
        let mut bv = BitVector::from_u64(0b1011, 4);
        assert!(bv.get(0) && bv.get(1) && !bv.get(2) && bv.get(3));
        bv.set(2, true);
        assert_eq!(bv.to_u64(), 0b1111);
        assert_eq!(bv.to_string(), "1111");
        assert!(!bv.get(10));
    }

    #[test]
    fn display_nested() {
        let v = Value::Compound(vec![
            ("id".into(), Value::Int(7)),
            (
                "samples".into(),
                Value::Sequence(vec![Value::Int(10), Value::Int(20)]),
            ),
            ("tag".into(), Value::Enum("RED".into())),
        ]);
        assert_eq!(v.to_string(), "{id=7, samples=[10, 20], tag=RED}");
    }

    #[test]
    fn accessors() {
        let v = Value::Compound(vec![("x".into(), Value::UInt(3))]);
        assert_eq!(v.member("x").and_then(Value::as_i64), Some(3));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::BigInt(BigInt::from(42)).as_u64(), Some(42));
        assert_eq!(Value::Blob(vec![0xAB, 0x01]).to_string(), "ab01");
    }
}
