//! HDF5 datatype descriptors (message type 0x0003).
//!
//! A [`Datatype`] is the self-describing binary layout of one value. It is
//! parsed from, and serialized to, the datatype message wire format:
//! byte 0 carries the class (low nibble) and version (high nibble), bytes
//! 1-3 the class bit field, bytes 4-7 the element size, followed by
//! class-specific properties. Compound, enumeration, variable-length and
//! array types nest further descriptors recursively.
//!
//! Every descriptor produced by [`Datatype::parse`] or by the builders in
//! [`crate::type_builders`] has passed [`Datatype::validate`].

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::String, vec::Vec};

use crate::bytes::{bytes_needed, pad8, ByteCursor, ByteWriter};
use crate::error::FormatError;

/// Datatype class codes.
pub mod class {
    pub const FIXED_POINT: u8 = 0;
    pub const FLOATING_POINT: u8 = 1;
    pub const TIME: u8 = 2;
    pub const STRING: u8 = 3;
    pub const BIT_FIELD: u8 = 4;
    pub const OPAQUE: u8 = 5;
    pub const COMPOUND: u8 = 6;
    pub const REFERENCE: u8 = 7;
    pub const ENUMERATION: u8 = 8;
    pub const VARIABLE_LENGTH: u8 = 9;
    pub const ARRAY: u8 = 10;
}

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// Reference type, from the low four bits of the class bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    /// Object reference: a file address.
    Object,
    /// Dataset region reference: a global heap id holding a selection.
    DatasetRegion,
    /// Version-4 object reference, possibly into another file.
    Object2,
    /// Version-4 dataset region reference.
    DatasetRegion2,
    /// Version-4 attribute reference.
    Attribute,
}

impl ReferenceType {
    pub fn code(self) -> u8 {
        match self {
            ReferenceType::Object => 0,
            ReferenceType::DatasetRegion => 1,
            ReferenceType::Object2 => 2,
            ReferenceType::DatasetRegion2 => 3,
            ReferenceType::Attribute => 4,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FormatError> {
        Ok(match code {
            0 => ReferenceType::Object,
            1 => ReferenceType::DatasetRegion,
            2 => ReferenceType::Object2,
            3 => ReferenceType::DatasetRegion2,
            4 => ReferenceType::Attribute,
            _ => return Err(FormatError::InvalidReferenceType(code)),
        })
    }

    /// True for the heap-backed version-4 encodings.
    pub fn is_v4(self) -> bool {
        matches!(
            self,
            ReferenceType::Object2 | ReferenceType::DatasetRegion2 | ReferenceType::Attribute
        )
    }
}

/// Floating-point mantissa normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MantissaNorm {
    /// No normalization.
    None,
    /// The most significant mantissa bit is stored and always set.
    MsbSet,
    /// The most significant mantissa bit is implied (IEEE).
    Implied,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Fixed dimensions for version-1 array members; empty for scalars.
    pub dimensions: Vec<u32>,
    /// Member datatype.
    pub datatype: Datatype,
}

impl CompoundMember {
    pub fn new(name: &str, byte_offset: u64, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            byte_offset,
            dimensions: Vec::new(),
            datatype,
        }
    }

    /// Number of base elements (product of dimensions, 1 for scalars).
    /// Saturates at `u64::MAX`.
    pub fn element_count(&self) -> u64 {
        self.dimensions
            .iter()
            .try_fold(1u64, |n, &d| n.checked_mul(d as u64))
            .unwrap_or(u64::MAX)
    }

    /// Bytes occupied in the parent record.
    pub fn size(&self) -> u64 {
        (self.datatype.type_size() as u64).saturating_mul(self.element_count())
    }
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// Parsed HDF5 datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0: fixed-point integer.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
        lo_pad: bool,
        hi_pad: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: floating point with an arbitrary bit layout.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        lo_pad: bool,
        hi_pad: bool,
        internal_pad: bool,
        mantissa_norm: MantissaNorm,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 2: time value.
    Time {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_precision: u16,
    },
    /// Class 3: fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4: bit field.
    BitField {
        size: u32,
        byte_order: DatatypeByteOrder,
        lo_pad: bool,
        hi_pad: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5: opaque blob with an ASCII tag.
    Opaque { size: u32, tag: String },
    /// Class 6: compound record.
    Compound {
        version: u8,
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7: reference.
    Reference {
        version: u8,
        size: u32,
        ref_type: ReferenceType,
    },
    /// Class 8: enumeration over an integer base type.
    Enumeration {
        version: u8,
        size: u32,
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: variable-length sequence or string stored in the global heap.
    VariableLength {
        size: u32,
        is_string: bool,
        padding: Option<StringPadding>,
        charset: Option<CharacterSet>,
        base_type: Box<Datatype>,
    },
    /// Class 10: fixed-size array of a base type.
    Array {
        version: u8,
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

fn parse_string_padding(val: u8) -> Result<StringPadding, FormatError> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(FormatError::InvalidStringPadding(val)),
    }
}

fn parse_charset(val: u8) -> Result<CharacterSet, FormatError> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(FormatError::InvalidCharacterSet(val)),
    }
}

fn padding_code(p: StringPadding) -> u8 {
    match p {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn charset_code(c: CharacterSet) -> u8 {
    match c {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

fn integer_byte_order(bf0: u8) -> DatatypeByteOrder {
    if bf0 & 0x01 == 0 {
        DatatypeByteOrder::LittleEndian
    } else {
        DatatypeByteOrder::BigEndian
    }
}

fn order_bit(order: DatatypeByteOrder) -> u8 {
    match order {
        DatatypeByteOrder::LittleEndian => 0,
        DatatypeByteOrder::BigEndian => 1,
    }
}

fn name_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read a null-terminated name, optionally padded to a multiple of 8 bytes
/// (terminator included) measured from the start of the name.
fn read_name(c: &mut ByteCursor<'_>, padded: bool) -> Result<String, FormatError> {
    let start = c.position();
    let name = name_string(c.c_string()?);
    if padded {
        c.align_from(start, 8)?;
    }
    Ok(name)
}

fn write_name(buf: &mut Vec<u8>, name: &str, padded: bool) {
    let start = buf.len();
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    if padded {
        buf.pad_to(start, 8);
    }
}

fn check_version(class_id: u8, version: u8, allowed: core::ops::RangeInclusive<u8>) -> Result<(), FormatError> {
    if allowed.contains(&version) {
        Ok(())
    } else {
        Err(FormatError::InvalidDatatypeVersion {
            class: class_id,
            version,
        })
    }
}

fn precision_required(bit_offset: u16, bit_precision: u16) -> u64 {
    (bit_offset as u64 + bit_precision as u64).div_ceil(8)
}

/// Byte size of an array of `dims` over a `base`-byte element, `None` on overflow.
fn array_bytes(base: u32, dims: &[u32]) -> Option<u64> {
    dims.iter()
        .try_fold(base as u64, |n, &d| n.checked_mul(d as u64))
}

impl Datatype {
    /// Parse a datatype message from raw bytes.
    ///
    /// Returns `(Datatype, bytes_consumed)` for recursive parsing.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        let mut c = ByteCursor::new(data);
        let dt = Self::parse_from(&mut c)?;
        dt.validate()?;
        Ok((dt, c.position()))
    }

    fn parse_from(c: &mut ByteCursor<'_>) -> Result<Datatype, FormatError> {
        let class_and_version = c.u8()?;
        let class_id = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        let bf0 = c.u8()?;
        let bf1 = c.u8()?;
        let _bf2 = c.u8()?;
        let size = c.u32()?;

        match class_id {
            class::FIXED_POINT => {
                check_version(class_id, version, 1..=3)?;
                let bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                Ok(Datatype::FixedPoint {
                    size,
                    byte_order: integer_byte_order(bf0),
                    lo_pad: bf0 & 0x02 != 0,
                    hi_pad: bf0 & 0x04 != 0,
                    signed: bf0 & 0x08 != 0,
                    bit_offset,
                    bit_precision,
                })
            }
            class::FLOATING_POINT => {
                check_version(class_id, version, 1..=3)?;
                let byte_order = match (bf0 >> 6 & 0x01, bf0 & 0x01) {
                    (0, 0) => DatatypeByteOrder::LittleEndian,
                    (0, _) => DatatypeByteOrder::BigEndian,
                    (_, 0) => return Err(FormatError::ReservedByteOrder),
                    _ => return Err(FormatError::VaxByteOrderUnsupported),
                };
                let mantissa_norm = match (bf0 >> 4) & 0x03 {
                    0 => MantissaNorm::None,
                    1 => MantissaNorm::MsbSet,
                    2 => MantissaNorm::Implied,
                    _ => return Err(FormatError::InvalidDatatypeClass(class_id)),
                };
                let bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                let exponent_location = c.u8()?;
                let exponent_size = c.u8()?;
                let mantissa_location = c.u8()?;
                let mantissa_size = c.u8()?;
                let exponent_bias = c.u32()?;
                Ok(Datatype::FloatingPoint {
                    size,
                    byte_order,
                    lo_pad: bf0 & 0x02 != 0,
                    hi_pad: bf0 & 0x04 != 0,
                    internal_pad: bf0 & 0x08 != 0,
                    mantissa_norm,
                    sign_location: bf1,
                    bit_offset,
                    bit_precision,
                    exponent_location,
                    exponent_size,
                    mantissa_location,
                    mantissa_size,
                    exponent_bias,
                })
            }
            class::TIME => {
                check_version(class_id, version, 1..=3)?;
                let bit_precision = c.u16()?;
                Ok(Datatype::Time {
                    size,
                    byte_order: integer_byte_order(bf0),
                    bit_precision,
                })
            }
            class::STRING => {
                check_version(class_id, version, 1..=3)?;
                Ok(Datatype::String {
                    size,
                    padding: parse_string_padding(bf0 & 0x0F)?,
                    charset: parse_charset(bf0 >> 4)?,
                })
            }
            class::BIT_FIELD => {
                check_version(class_id, version, 1..=3)?;
                let bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                Ok(Datatype::BitField {
                    size,
                    byte_order: integer_byte_order(bf0),
                    lo_pad: bf0 & 0x02 != 0,
                    hi_pad: bf0 & 0x04 != 0,
                    bit_offset,
                    bit_precision,
                })
            }
            class::OPAQUE => {
                check_version(class_id, version, 1..=3)?;
                let raw = c.take(bf0 as usize)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Ok(Datatype::Opaque {
                    size,
                    tag: name_string(&raw[..end]),
                })
            }
            class::COMPOUND => {
                check_version(class_id, version, 1..=3)?;
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    members.push(Self::parse_member(c, version, size)?);
                }
                Ok(Datatype::Compound {
                    version,
                    size,
                    members,
                })
            }
            class::REFERENCE => {
                check_version(class_id, version, 1..=4)?;
                let ref_type = ReferenceType::from_code(bf0 & 0x0F)?;
                if ref_type.is_v4() && version < 4 {
                    return Err(FormatError::InvalidDatatypeVersion {
                        class: class_id,
                        version,
                    });
                }
                Ok(Datatype::Reference {
                    version,
                    size,
                    ref_type,
                })
            }
            class::ENUMERATION => {
                check_version(class_id, version, 1..=3)?;
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let base_type = Self::parse_from(c)?;
                let base_size = base_type.type_size() as usize;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(read_name(c, version < 3)?);
                }
                let mut members = Vec::with_capacity(count);
                for name in names {
                    members.push(EnumMember {
                        name,
                        value: c.take(base_size)?.to_vec(),
                    });
                }
                Ok(Datatype::Enumeration {
                    version,
                    size,
                    base_type: Box::new(base_type),
                    members,
                })
            }
            class::VARIABLE_LENGTH => {
                check_version(class_id, version, 1..=3)?;
                let is_string = match bf0 & 0x0F {
                    0 => false,
                    1 => true,
                    other => return Err(FormatError::InvalidVariableLengthType(other)),
                };
                let (padding, charset) = if is_string {
                    (
                        Some(parse_string_padding(bf0 >> 4)?),
                        Some(parse_charset(bf1 & 0x0F)?),
                    )
                } else {
                    (None, None)
                };
                let base_type = Self::parse_from(c)?;
                Ok(Datatype::VariableLength {
                    size,
                    is_string,
                    padding,
                    charset,
                    base_type: Box::new(base_type),
                })
            }
            class::ARRAY => {
                check_version(class_id, version, 2..=3)?;
                let ndims = c.u8()? as usize;
                if version == 2 {
                    c.skip(3)?;
                }
                let mut dimensions = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dimensions.push(c.u32()?);
                }
                if version == 2 {
                    for i in 0..ndims {
                        if c.u32()? as usize != i {
                            return Err(FormatError::NonIdentityPermutation);
                        }
                    }
                }
                let base_type = Self::parse_from(c)?;
                let required = array_bytes(base_type.type_size(), &dimensions).unwrap_or(u64::MAX);
                if required != size as u64 {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: size as u64,
                        required,
                    });
                }
                Ok(Datatype::Array {
                    version,
                    base_type: Box::new(base_type),
                    dimensions,
                })
            }
            _ => Err(FormatError::InvalidDatatypeClass(class_id)),
        }
    }

    fn parse_member(
        c: &mut ByteCursor<'_>,
        version: u8,
        compound_size: u32,
    ) -> Result<CompoundMember, FormatError> {
        let name = read_name(c, version < 3)?;
        let byte_offset = if version == 3 {
            c.uint(bytes_needed(compound_size as u64))?
        } else {
            c.u32()? as u64
        };
        let mut dimensions = Vec::new();
        if version == 1 {
            let ndims = c.u8()? as usize;
            // reserved(3), permutation(4), reserved(4)
            c.skip(11)?;
            for i in 0..4 {
                let d = c.u32()?;
                if i < ndims {
                    dimensions.push(d);
                }
            }
        }
        let datatype = Self::parse_from(c)?;
        Ok(CompoundMember {
            name,
            byte_offset,
            dimensions,
            datatype,
        })
    }

    /// Element size in bytes.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. } => *size,
            Datatype::Array {
                base_type,
                dimensions,
                ..
            } => array_bytes(base_type.type_size(), dimensions)
                .map_or(u32::MAX, |n| n.min(u32::MAX as u64) as u32),
        }
    }

    /// Class code (0-10).
    pub fn class_id(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => class::FIXED_POINT,
            Datatype::FloatingPoint { .. } => class::FLOATING_POINT,
            Datatype::Time { .. } => class::TIME,
            Datatype::String { .. } => class::STRING,
            Datatype::BitField { .. } => class::BIT_FIELD,
            Datatype::Opaque { .. } => class::OPAQUE,
            Datatype::Compound { .. } => class::COMPOUND,
            Datatype::Reference { .. } => class::REFERENCE,
            Datatype::Enumeration { .. } => class::ENUMERATION,
            Datatype::VariableLength { .. } => class::VARIABLE_LENGTH,
            Datatype::Array { .. } => class::ARRAY,
        }
    }

    /// Message format version written by [`serialize`](Self::serialize).
    pub fn version(&self) -> u8 {
        match self {
            Datatype::Compound { version, .. }
            | Datatype::Reference { version, .. }
            | Datatype::Enumeration { version, .. }
            | Datatype::Array { version, .. } => *version,
            _ => 1,
        }
    }

    /// Class bit field (bytes 1-3 of the message).
    pub fn class_flags(&self) -> [u8; 3] {
        match self {
            Datatype::FixedPoint {
                byte_order,
                signed,
                lo_pad,
                hi_pad,
                ..
            } => {
                let bf0 = order_bit(*byte_order)
                    | (*lo_pad as u8) << 1
                    | (*hi_pad as u8) << 2
                    | (*signed as u8) << 3;
                [bf0, 0, 0]
            }
            Datatype::FloatingPoint {
                byte_order,
                lo_pad,
                hi_pad,
                internal_pad,
                mantissa_norm,
                sign_location,
                ..
            } => {
                let norm = match mantissa_norm {
                    MantissaNorm::None => 0,
                    MantissaNorm::MsbSet => 1,
                    MantissaNorm::Implied => 2,
                };
                let bf0 = order_bit(*byte_order)
                    | (*lo_pad as u8) << 1
                    | (*hi_pad as u8) << 2
                    | (*internal_pad as u8) << 3
                    | norm << 4;
                [bf0, *sign_location, 0]
            }
            Datatype::Time { byte_order, .. } => [order_bit(*byte_order), 0, 0],
            Datatype::String {
                padding, charset, ..
            } => [padding_code(*padding) | charset_code(*charset) << 4, 0, 0],
            Datatype::BitField {
                byte_order,
                lo_pad,
                hi_pad,
                ..
            } => [
                order_bit(*byte_order) | (*lo_pad as u8) << 1 | (*hi_pad as u8) << 2,
                0,
                0,
            ],
            Datatype::Opaque { tag, .. } => [pad8(tag.len() + 1).min(255) as u8, 0, 0],
            Datatype::Compound { members, .. } => {
                let n = members.len() as u16;
                [n as u8, (n >> 8) as u8, 0]
            }
            Datatype::Reference { ref_type, .. } => [ref_type.code(), 0, 0],
            Datatype::Enumeration { members, .. } => {
                let n = members.len() as u16;
                [n as u8, (n >> 8) as u8, 0]
            }
            Datatype::VariableLength {
                is_string,
                padding,
                charset,
                ..
            } => {
                if *is_string {
                    let pad = padding.map(padding_code).unwrap_or(0);
                    let cs = charset.map(charset_code).unwrap_or(0);
                    [1 | pad << 4, cs, 0]
                } else {
                    [0, 0, 0]
                }
            }
            Datatype::Array { .. } => [0, 0, 0],
        }
    }

    /// Check the structural invariants of this descriptor and all nested ones.
    pub fn validate(&self) -> Result<(), FormatError> {
        match self {
            Datatype::FixedPoint {
                size,
                bit_offset,
                bit_precision,
                ..
            }
            | Datatype::BitField {
                size,
                bit_offset,
                bit_precision,
                ..
            } => {
                let required = precision_required(*bit_offset, *bit_precision).max(1);
                if *bit_precision == 0 || required > *size as u64 {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: *size as u64,
                        required,
                    });
                }
                Ok(())
            }
            Datatype::Time {
                size,
                bit_precision,
                ..
            } => {
                let required = precision_required(0, *bit_precision).max(1);
                if *bit_precision == 0 || required > *size as u64 {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: *size as u64,
                        required,
                    });
                }
                Ok(())
            }
            Datatype::FloatingPoint {
                size,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                ..
            } => {
                let window = precision_required(*bit_offset, *bit_precision);
                let limit = *bit_offset as u32 + *bit_precision as u32;
                let fields_fit = *exponent_location as u32 + *exponent_size as u32 <= limit
                    && *mantissa_location as u32 + *mantissa_size as u32 <= limit
                    && (*sign_location as u32) < limit
                    && *exponent_size > 0
                    && *exponent_size <= 32
                    && *mantissa_size <= 64;
                if window > *size as u64 || !fields_fit {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: *size as u64,
                        required: window.max(precision_required(0, *bit_precision)),
                    });
                }
                Ok(())
            }
            Datatype::String { size, .. } => {
                if *size == 0 {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: 0,
                        required: 1,
                    });
                }
                Ok(())
            }
            Datatype::Opaque { .. } | Datatype::Reference { .. } => Ok(()),
            Datatype::Compound { size, members, .. } => {
                let mut spans: Vec<(u64, u64, &str)> = Vec::with_capacity(members.len());
                for m in members {
                    m.datatype.validate()?;
                    let end = m.byte_offset.saturating_add(m.size());
                    if end > *size as u64 {
                        return Err(FormatError::InconsistentTypeSize {
                            declared: *size as u64,
                            required: end,
                        });
                    }
                    if end > m.byte_offset {
                        spans.push((m.byte_offset, end, m.name.as_str()));
                    }
                }
                spans.sort_by_key(|s| s.0);
                let mut reach: Option<(u64, &str)> = None;
                for &(start, end, name) in &spans {
                    if let Some((prev_end, prev_name)) = reach {
                        if start < prev_end {
                            return Err(FormatError::OverlappingCompoundMembers {
                                first: prev_name.into(),
                                second: name.into(),
                            });
                        }
                    }
                    if reach.map_or(true, |(prev_end, _)| end > prev_end) {
                        reach = Some((end, name));
                    }
                }
                Ok(())
            }
            Datatype::Enumeration {
                size,
                base_type,
                members,
                ..
            } => {
                base_type.validate()?;
                if !matches!(**base_type, Datatype::FixedPoint { .. }) {
                    return Err(FormatError::ValueKindMismatch {
                        expected: "integer enum base type",
                        found: "non-integer base type",
                    });
                }
                let base = base_type.type_size();
                if *size != base {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: *size as u64,
                        required: base as u64,
                    });
                }
                if let Some(m) = members.iter().find(|m| m.value.len() != base as usize) {
                    return Err(FormatError::SizeMismatch {
                        expected: base as usize,
                        actual: m.value.len(),
                    });
                }
                Ok(())
            }
            Datatype::VariableLength { base_type, .. } => base_type.validate(),
            Datatype::Array {
                base_type,
                dimensions,
                ..
            } => {
                base_type.validate()?;
                if dimensions.is_empty() || dimensions.contains(&0) {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: 0,
                        required: base_type.type_size() as u64,
                    });
                }
                let total = array_bytes(base_type.type_size(), dimensions).unwrap_or(u64::MAX);
                if total > u32::MAX as u64 {
                    return Err(FormatError::InconsistentTypeSize {
                        declared: u32::MAX as u64,
                        required: total,
                    });
                }
                Ok(())
            }
        }
    }

    /// Serialize datatype to HDF5 message bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.class_id() | self.version() << 4);
        buf.extend_from_slice(&self.class_flags());
        buf.put_u32(self.type_size());
        match self {
            Datatype::FixedPoint {
                bit_offset,
                bit_precision,
                ..
            }
            | Datatype::BitField {
                bit_offset,
                bit_precision,
                ..
            } => {
                buf.put_u16(*bit_offset);
                buf.put_u16(*bit_precision);
            }
            Datatype::FloatingPoint {
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
                ..
            } => {
                buf.put_u16(*bit_offset);
                buf.put_u16(*bit_precision);
                buf.put_u8(*exponent_location);
                buf.put_u8(*exponent_size);
                buf.put_u8(*mantissa_location);
                buf.put_u8(*mantissa_size);
                buf.put_u32(*exponent_bias);
            }
            Datatype::Time { bit_precision, .. } => buf.put_u16(*bit_precision),
            Datatype::String { .. } | Datatype::Reference { .. } => {}
            Datatype::Opaque { tag, .. } => write_name(buf, tag, true),
            Datatype::Compound {
                version,
                size,
                members,
            } => {
                for m in members {
                    write_name(buf, &m.name, *version < 3);
                    if *version == 3 {
                        buf.put_uint(m.byte_offset, bytes_needed(*size as u64));
                    } else {
                        buf.put_u32(m.byte_offset as u32);
                    }
                    if *version == 1 {
                        buf.put_u8(m.dimensions.len() as u8);
                        buf.put_zeros(11);
                        for i in 0..4 {
                            buf.put_u32(m.dimensions.get(i).copied().unwrap_or(0));
                        }
                    }
                    m.datatype.serialize_into(buf);
                }
            }
            Datatype::Enumeration {
                version,
                base_type,
                members,
                ..
            } => {
                base_type.serialize_into(buf);
                for m in members {
                    write_name(buf, &m.name, *version < 3);
                }
                for m in members {
                    buf.extend_from_slice(&m.value);
                }
            }
            Datatype::VariableLength { base_type, .. } => base_type.serialize_into(buf),
            Datatype::Array {
                version,
                base_type,
                dimensions,
            } => {
                buf.put_u8(dimensions.len() as u8);
                if *version == 2 {
                    buf.put_zeros(3);
                }
                for d in dimensions {
                    buf.put_u32(*d);
                }
                if *version == 2 {
                    for i in 0..dimensions.len() {
                        buf.put_u32(i as u32);
                    }
                }
                base_type.serialize_into(buf);
            }
        }
    }

    /// Short class name for diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "fixed-point",
            Datatype::FloatingPoint { .. } => "floating-point",
            Datatype::Time { .. } => "time",
            Datatype::String { .. } => "string",
            Datatype::BitField { .. } => "bit field",
            Datatype::Opaque { .. } => "opaque",
            Datatype::Compound { .. } => "compound",
            Datatype::Reference { .. } => "reference",
            Datatype::Enumeration { .. } => "enumeration",
            Datatype::VariableLength { .. } => "variable-length",
            Datatype::Array { .. } => "array",
        }
    }
}
