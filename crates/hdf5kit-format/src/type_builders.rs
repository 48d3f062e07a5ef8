//! Constructors and builders for datatype descriptors.
//!
//! Builders validate on `build`, so a descriptor that breaks the size or
//! layout invariants is rejected before it reaches the codec.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::{String, ToString}, vec::Vec};

use crate::datatype::{
    CharacterSet, CompoundMember, Datatype, DatatypeByteOrder, EnumMember, MantissaNorm,
    ReferenceType, StringPadding,
};
use crate::error::FormatError;

// ---- Atomic type constructors ----

/// Integer of `size` bytes using the full width.
pub fn make_int_type(size: u32, signed: bool, byte_order: DatatypeByteOrder) -> Datatype {
    Datatype::FixedPoint {
        size,
        byte_order,
        signed,
        lo_pad: false,
        hi_pad: false,
        bit_offset: 0,
        bit_precision: (size * 8) as u16,
    }
}

pub fn make_i8_type() -> Datatype {
    make_int_type(1, true, DatatypeByteOrder::LittleEndian)
}

pub fn make_i16_type() -> Datatype {
    make_int_type(2, true, DatatypeByteOrder::LittleEndian)
}

pub fn make_i32_type() -> Datatype {
    make_int_type(4, true, DatatypeByteOrder::LittleEndian)
}

pub fn make_i64_type() -> Datatype {
    make_int_type(8, true, DatatypeByteOrder::LittleEndian)
}

pub fn make_u8_type() -> Datatype {
    make_int_type(1, false, DatatypeByteOrder::LittleEndian)
}

pub fn make_u16_type() -> Datatype {
    make_int_type(2, false, DatatypeByteOrder::LittleEndian)
}

pub fn make_u32_type() -> Datatype {
    make_int_type(4, false, DatatypeByteOrder::LittleEndian)
}

pub fn make_u64_type() -> Datatype {
    make_int_type(8, false, DatatypeByteOrder::LittleEndian)
}

/// IEEE-754 binary32 in the given byte order.
pub fn make_f32_type_with_order(byte_order: DatatypeByteOrder) -> Datatype {
    Datatype::FloatingPoint {
        size: 4,
        byte_order,
        lo_pad: false,
        hi_pad: false,
        internal_pad: false,
        mantissa_norm: MantissaNorm::Implied,
        sign_location: 31,
        bit_offset: 0,
        bit_precision: 32,
        exponent_location: 23,
        exponent_size: 8,
        mantissa_location: 0,
        mantissa_size: 23,
        exponent_bias: 127,
    }
}

/// IEEE-754 binary64 in the given byte order.
pub fn make_f64_type_with_order(byte_order: DatatypeByteOrder) -> Datatype {
    Datatype::FloatingPoint {
        size: 8,
        byte_order,
        lo_pad: false,
        hi_pad: false,
        internal_pad: false,
        mantissa_norm: MantissaNorm::Implied,
        sign_location: 63,
        bit_offset: 0,
        bit_precision: 64,
        exponent_location: 52,
        exponent_size: 11,
        mantissa_location: 0,
        mantissa_size: 52,
        exponent_bias: 1023,
    }
}

pub fn make_f32_type() -> Datatype {
    make_f32_type_with_order(DatatypeByteOrder::LittleEndian)
}

pub fn make_f64_type() -> Datatype {
    make_f64_type_with_order(DatatypeByteOrder::LittleEndian)
}

/// IEEE-754 binary16.
pub fn make_f16_type() -> Datatype {
    Datatype::FloatingPoint {
        size: 2,
        byte_order: DatatypeByteOrder::LittleEndian,
        lo_pad: false,
        hi_pad: false,
        internal_pad: false,
        mantissa_norm: MantissaNorm::Implied,
        sign_location: 15,
        bit_offset: 0,
        bit_precision: 16,
        exponent_location: 10,
        exponent_size: 5,
        mantissa_location: 0,
        mantissa_size: 10,
        exponent_bias: 15,
    }
}

/// Fixed-length string.
pub fn make_string_type(size: u32, padding: StringPadding, charset: CharacterSet) -> Datatype {
    Datatype::String {
        size,
        padding,
        charset,
    }
}

/// Size of a variable-length descriptor `{count, heap address, heap id}`.
pub fn vl_descriptor_size(offset_size: u8) -> u32 {
    4 + offset_size as u32 + 4
}

/// Variable-length UTF-8 string.
pub fn make_vl_string_type(offset_size: u8) -> Datatype {
    Datatype::VariableLength {
        size: vl_descriptor_size(offset_size),
        is_string: true,
        padding: Some(StringPadding::NullTerminate),
        charset: Some(CharacterSet::Utf8),
        base_type: Box::new(make_u8_type()),
    }
}

/// Variable-length sequence of `base`.
pub fn make_vl_sequence_type(base: Datatype, offset_size: u8) -> Datatype {
    Datatype::VariableLength {
        size: vl_descriptor_size(offset_size),
        is_string: false,
        padding: None,
        charset: None,
        base_type: Box::new(base),
    }
}

/// Reference of the given kind, sized for the file's offset width.
pub fn make_reference_type(ref_type: ReferenceType, offset_size: u8) -> Datatype {
    let (version, size) = match ref_type {
        ReferenceType::Object => (1, offset_size as u32),
        ReferenceType::DatasetRegion => (1, offset_size as u32 + 4),
        _ => (4, vl_descriptor_size(offset_size)),
    };
    Datatype::Reference {
        version,
        size,
        ref_type,
    }
}

/// Opaque blob of `size` bytes.
pub fn make_opaque_type(size: u32, tag: &str) -> Datatype {
    Datatype::Opaque {
        size,
        tag: tag.to_string(),
    }
}

/// Bit field of `size` bytes using the full width.
pub fn make_bitfield_type(size: u32) -> Datatype {
    Datatype::BitField {
        size,
        byte_order: DatatypeByteOrder::LittleEndian,
        lo_pad: false,
        hi_pad: false,
        bit_offset: 0,
        bit_precision: (size * 8) as u16,
    }
}

/// Time value of `size` bytes.
pub fn make_time_type(size: u32) -> Datatype {
    Datatype::Time {
        size,
        byte_order: DatatypeByteOrder::LittleEndian,
        bit_precision: (size * 8) as u16,
    }
}

/// Array of `base` with the given dimensions (version 3 encoding).
pub fn make_array_type(base: Datatype, dims: &[u32]) -> Result<Datatype, FormatError> {
    let dt = Datatype::Array {
        version: 3,
        base_type: Box::new(base),
        dimensions: dims.to_vec(),
    };
    dt.validate()?;
    Ok(dt)
}

// ---- Compound / Enum type builders ----

/// Builder for compound (record) datatypes.
///
/// Fields added with [`field`](Self::field) are packed after the previous
/// field; [`field_at`](Self::field_at) places a field at an explicit offset.
pub struct CompoundTypeBuilder {
    members: Vec<CompoundMember>,
    next_offset: u64,
    size: Option<u32>,
    version: u8,
}

impl CompoundTypeBuilder {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            next_offset: 0,
            size: None,
            version: 3,
        }
    }

    /// Add a named field directly after the previous one.
    pub fn field(self, name: &str, datatype: Datatype) -> Self {
        let offset = self.next_offset;
        self.field_at(name, offset, datatype)
    }

    /// Add a named field at an explicit byte offset.
    pub fn field_at(mut self, name: &str, offset: u64, datatype: Datatype) -> Self {
        self.next_offset = self.next_offset.max(offset + datatype.type_size() as u64);
        self.members.push(CompoundMember::new(name, offset, datatype));
        self
    }

    pub fn f64_field(self, name: &str) -> Self {
        self.field(name, make_f64_type())
    }

    pub fn f32_field(self, name: &str) -> Self {
        self.field(name, make_f32_type())
    }

    pub fn i16_field(self, name: &str) -> Self {
        self.field(name, make_i16_type())
    }

    pub fn i32_field(self, name: &str) -> Self {
        self.field(name, make_i32_type())
    }

    pub fn i64_field(self, name: &str) -> Self {
        self.field(name, make_i64_type())
    }

    pub fn u8_field(self, name: &str) -> Self {
        self.field(name, make_u8_type())
    }

    /// Set the record size explicitly (to include trailing padding).
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Encoding version (1, 2 or 3; default 3).
    pub fn version(mut self, version: u8) -> Self {
        self.version = version.clamp(1, 3);
        self
    }

    /// Build and validate the compound datatype.
    pub fn build(self) -> Result<Datatype, FormatError> {
        let size = self.size.unwrap_or(self.next_offset as u32);
        let dt = Datatype::Compound {
            version: self.version,
            size,
            members: self.members,
        };
        dt.validate()?;
        Ok(dt)
    }
}

impl Default for CompoundTypeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for enumeration datatypes over an integer base type.
pub struct EnumTypeBuilder {
    base_type: Datatype,
    members: Vec<EnumMember>,
}

impl EnumTypeBuilder {
    /// Enum over an arbitrary integer base type.
    pub fn with_base(base_type: Datatype) -> Self {
        Self {
            base_type,
            members: Vec::new(),
        }
    }

    /// Enum with an i32 base type.
    pub fn i32_based() -> Self {
        Self::with_base(make_i32_type())
    }

    /// Enum with a u8 base type.
    pub fn u8_based() -> Self {
        Self::with_base(make_u8_type())
    }

    /// Add a named value, encoded in the base type's size and byte order.
    pub fn value(mut self, name: &str, val: i64) -> Self {
        let size = self.base_type.type_size() as usize;
        let le = val.to_le_bytes();
        let mut bytes: Vec<u8> = (0..size)
            .map(|i| if i < 8 { le[i] } else if val < 0 { 0xFF } else { 0 })
            .collect();
        if let Datatype::FixedPoint {
            byte_order: DatatypeByteOrder::BigEndian,
            ..
        } = self.base_type
        {
            bytes.reverse();
        }
        self.members.push(EnumMember {
            name: name.to_string(),
            value: bytes,
        });
        self
    }

    /// Build and validate the enumeration datatype.
    pub fn build(self) -> Result<Datatype, FormatError> {
        let size = self.base_type.type_size();
        let dt = Datatype::Enumeration {
            version: 3,
            size,
            base_type: Box::new(self.base_type),
            members: self.members,
        };
        dt.validate()?;
        Ok(dt)
    }
}

/// Member names of a compound type, in declaration order.
pub fn member_names(dt: &Datatype) -> Vec<String> {
    match dt {
        Datatype::Compound { members, .. } => members.iter().map(|m| m.name.clone()).collect(),
        _ => Vec::new(),
    }
}
