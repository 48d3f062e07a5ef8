//! Typed records: Rust types that know their own HDF5 datatype.
//!
//! [`H5Type`] binds a Rust type to a [`Datatype`] and converts between the
//! type and a decoded [`Value`]. Structs get an implementation from
//! `#[derive(H5Type)]` in `hdf5kit-derive`, which lays fields out packed in
//! declaration order through [`packed_compound`].

#[cfg(not(feature = "std"))]
use alloc::{
    boxed::Box,
    string::{String, ToString},
    vec,
    vec::Vec,
};

use crate::datatype::{CompoundMember, Datatype, EnumMember};
use crate::error::FormatError;
use crate::type_builders::*;
use crate::value::Value;

/// A Rust type with a fixed HDF5 datatype.
pub trait H5Type: Sized {
    /// Datatype of one element, sized for 8-byte file offsets.
    fn datatype() -> Datatype;

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self, FormatError>;
}

/// Compound datatype with `fields` packed back to back in order.
pub fn packed_compound<'a>(fields: impl IntoIterator<Item = (&'a str, Datatype)>) -> Datatype {
    let mut offset = 0u64;
    let members = fields
        .into_iter()
        .map(|(name, datatype)| {
            let member = CompoundMember::new(name, offset, datatype);
            offset += member.size();
            member
        })
        .collect();
    Datatype::Compound {
        version: 3,
        size: offset as u32,
        members,
    }
}

/// One named member of a compound value.
pub fn member(name: &str, value: Value) -> (String, Value) {
    (name.to_string(), value)
}

/// Look up the member `name` of a compound value and convert it.
pub fn field<T: H5Type>(value: &Value, name: &str) -> Result<T, FormatError> {
    let members = value.as_members().ok_or(FormatError::ValueKindMismatch {
        expected: "compound",
        found: value.kind_name(),
    })?;
    let member = members
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
        .ok_or_else(|| FormatError::MissingCompoundMember(name.to_string()))?;
    T::from_value(member)
}

macro_rules! impl_signed {
    ($($t:ty => $make:ident),*) => {$(
        impl H5Type for $t {
            fn datatype() -> Datatype {
                $make()
            }

            fn to_value(&self) -> Value {
                Value::Int(*self as i64)
            }

            fn from_value(value: &Value) -> Result<Self, FormatError> {
                value
                    .as_i64()
                    .ok_or(FormatError::ValueKindMismatch {
                        expected: "integer",
                        found: value.kind_name(),
                    })
                    .and_then(|v| <$t>::try_from(v).map_err(|_| FormatError::ValueOutOfRange))
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($t:ty => $make:ident),*) => {$(
        impl H5Type for $t {
            fn datatype() -> Datatype {
                $make()
            }

            fn to_value(&self) -> Value {
                Value::UInt(*self as u64)
            }

            fn from_value(value: &Value) -> Result<Self, FormatError> {
                match value {
                    Value::Int(v) if *v < 0 => Err(FormatError::ValueOutOfRange),
                    _ => value
                        .as_u64()
                        .ok_or(FormatError::ValueKindMismatch {
                            expected: "integer",
                            found: value.kind_name(),
                        })
                        .and_then(|v| <$t>::try_from(v).map_err(|_| FormatError::ValueOutOfRange)),
                }
            }
        }
    )*};
}

impl_signed!(i8 => make_i8_type, i16 => make_i16_type, i32 => make_i32_type, i64 => make_i64_type);
impl_unsigned!(u8 => make_u8_type, u16 => make_u16_type, u32 => make_u32_type, u64 => make_u64_type);

impl H5Type for f32 {
    fn datatype() -> Datatype {
        make_f32_type()
    }

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl H5Type for f64 {
    fn datatype() -> Datatype {
        make_f64_type()
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        value.as_f64().ok_or(FormatError::ValueKindMismatch {
            expected: "float",
            found: value.kind_name(),
        })
    }
}

/// Stored as an `i8` enum `{FALSE = 0, TRUE = 1}`.
impl H5Type for bool {
    fn datatype() -> Datatype {
        Datatype::Enumeration {
            version: 3,
            size: 1,
            base_type: Box::new(make_i8_type()),
            members: ["FALSE", "TRUE"]
                .iter()
                .enumerate()
                .map(|(i, name)| EnumMember {
                    name: name.to_string(),
                    value: vec![i as u8],
                })
                .collect(),
        }
    }

    fn to_value(&self) -> Value {
        Value::Enum(if *self { "TRUE" } else { "FALSE" }.to_string())
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        match value {
            Value::Enum(name) if name == "TRUE" => Ok(true),
            Value::Enum(name) if name == "FALSE" => Ok(false),
            Value::Enum(name) => Err(FormatError::UnknownEnumName(name.clone())),
            other => other.as_i64().map(|v| v != 0).ok_or(FormatError::ValueKindMismatch {
                expected: "enum",
                found: other.kind_name(),
            }),
        }
    }
}

/// Variable-length UTF-8 string.
impl H5Type for String {
    fn datatype() -> Datatype {
        make_vl_string_type(8)
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(FormatError::ValueKindMismatch {
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }
}

/// Variable-length sequence.
impl<T: H5Type> H5Type for Vec<T> {
    fn datatype() -> Datatype {
        make_vl_sequence_type(T::datatype(), 8)
    }

    fn to_value(&self) -> Value {
        Value::Sequence(self.iter().map(T::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        value
            .as_elements()
            .ok_or(FormatError::ValueKindMismatch {
                expected: "sequence",
                found: value.kind_name(),
            })?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

/// Fixed-size one-dimensional array.
impl<T: H5Type, const N: usize> H5Type for [T; N] {
    fn datatype() -> Datatype {
        Datatype::Array {
            version: 3,
            base_type: Box::new(T::datatype()),
            dimensions: vec![N as u32],
        }
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(T::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, FormatError> {
        let elements = value.as_elements().ok_or(FormatError::ValueKindMismatch {
            expected: "array",
            found: value.kind_name(),
        })?;
        let items = elements
            .iter()
            .map(T::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        let actual = items.len();
        items
            .try_into()
            .map_err(|_| FormatError::ElementCountMismatch { expected: N, actual })
    }
}
