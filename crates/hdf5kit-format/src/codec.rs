//! Datatype codec: raw element bytes to [`Value`] and back.
//!
//! Decode and encode are a single exhaustive match over [`Datatype`].
//! Variable-length data and heap-backed references go through the
//! [`HeapSource`] / [`HeapSink`] attached to the [`Codec`]; decoding such a
//! value without one fails with [`FormatError::HeapNotAttached`].

#[cfg(not(feature = "std"))]
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};

use crate::bytes::{is_undefined, ByteCursor, ByteWriter};
use crate::datatype::{CharacterSet, Datatype, ReferenceType, StringPadding};
use crate::error::FormatError;
use crate::global_heap::{HeapSink, HeapSource};
use crate::numeric::{self, BitLayout, FloatLayout, IntLayout};
use crate::property_list::{CodecProps, EnumPolicy};
use crate::record::H5Type;
use crate::reference::{
    decode_region_payload, decode_v4_payload, encode_region_payload, encode_v4_payload,
    ObjectLocator, Reference,
};
use crate::value::Value;

/// Address token width written into version-4 reference blobs.
const V4_TOKEN_SIZE: u8 = 8;

/// Decodes and encodes element bytes under a set of codec properties.
///
/// A codec borrows its collaborators; it holds no state of its own, so one
/// instance may be shared across threads when the attached heap allows it.
#[derive(Clone, Default)]
pub struct Codec<'a> {
    props: CodecProps,
    heap: Option<&'a dyn HeapSource>,
    sink: Option<&'a dyn HeapSink>,
    locator: Option<&'a dyn ObjectLocator>,
}

impl core::fmt::Debug for Codec<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Codec")
            .field("props", &self.props)
            .field("heap", &self.heap.is_some())
            .field("sink", &self.sink.is_some())
            .field("locator", &self.locator.is_some())
            .finish()
    }
}

impl<'a> Codec<'a> {
    pub fn new(props: CodecProps) -> Self {
        Self {
            props,
            heap: None,
            sink: None,
            locator: None,
        }
    }

    /// Resolve variable-length and region data through `heap`.
    pub fn with_heap(mut self, heap: &'a dyn HeapSource) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Store variable-length and region data through `sink` on encode.
    pub fn with_heap_sink(mut self, sink: &'a dyn HeapSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach one store for both directions.
    pub fn with_global_heap<H: HeapSource + HeapSink>(self, store: &'a H) -> Self {
        self.with_heap(store).with_heap_sink(store)
    }

    /// Annotate decoded references with the object they point at.
    pub fn with_locator(mut self, locator: &'a dyn ObjectLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn props(&self) -> &CodecProps {
        &self.props
    }

    /// Decode one element. `bytes` must be exactly `dt.type_size()` long.
    pub fn decode(&self, dt: &Datatype, bytes: &[u8]) -> Result<Value, FormatError> {
        check_size(dt, bytes)?;
        match dt {
            Datatype::FixedPoint { .. } | Datatype::Time { .. } => {
                dt.validate()?;
                let layout = IntLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                Ok(numeric::decode_int(&layout, bytes))
            }
            Datatype::FloatingPoint { .. } => {
                dt.validate()?;
                let layout =
                    FloatLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                Ok(Value::Float(numeric::decode_float(&layout, bytes)?))
            }
            Datatype::BitField { .. } => {
                dt.validate()?;
                let layout = BitLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                Ok(Value::Bits(numeric::decode_bits(&layout, bytes)))
            }
            Datatype::String {
                padding, charset, ..
            } => Ok(Value::String(decode_text(bytes, *padding, *charset))),
            Datatype::Opaque { .. } => Ok(Value::Blob(bytes.to_vec())),
            Datatype::Compound { members, .. } => {
                let mut out = Vec::with_capacity(members.len());
                for m in members {
                    let start = m.byte_offset as usize;
                    let span = slice(bytes, start, m.size() as usize)?;
                    let value = if m.dimensions.is_empty() {
                        self.decode(&m.datatype, span)?
                    } else {
                        Value::Array(self.decode_all(&m.datatype, span)?)
                    };
                    out.push((m.name.clone(), value));
                }
                Ok(Value::Compound(out))
            }
            Datatype::Reference { ref_type, .. } => self.decode_reference(*ref_type, bytes),
            Datatype::Enumeration { members, .. } => {
                if let Some(m) = members.iter().find(|m| m.value == bytes) {
                    return Ok(Value::Enum(m.name.clone()));
                }
                match self.props.enum_policy {
                    EnumPolicy::Strict => Err(FormatError::UndefinedEnumValue),
                    EnumPolicy::Sentinel => {
                        log::warn!(
                            "enum bytes {bytes:02x?} have no table entry; decoding as {:?}",
                            self.props.undefined_enum_name
                        );
                        Ok(Value::Enum(self.props.undefined_enum_name.clone()))
                    }
                }
            }
            Datatype::VariableLength {
                is_string,
                padding,
                charset,
                base_type,
                ..
            } => {
                let (count, address, id) = read_descriptor(bytes)?;
                if count == 0 {
                    return Ok(if *is_string {
                        Value::String(String::new())
                    } else {
                        Value::Sequence(Vec::new())
                    });
                }
                let payload = self.resolve(address, id)?;
                if *is_string {
                    let len = (count as usize).min(payload.len());
                    Ok(Value::String(decode_text(
                        &payload[..len],
                        padding.unwrap_or(StringPadding::NullTerminate),
                        charset.unwrap_or(CharacterSet::Ascii),
                    )))
                } else {
                    let width = base_type.type_size() as usize;
                    let span = slice(&payload, 0, count as usize * width)?;
                    Ok(Value::Sequence(self.decode_all(base_type, span)?))
                }
            }
            Datatype::Array { base_type, .. } => Ok(Value::Array(self.decode_all(base_type, bytes)?)),
        }
    }

    /// Encode one element into exactly `dt.type_size()` bytes.
    pub fn encode(&self, dt: &Datatype, value: &Value) -> Result<Vec<u8>, FormatError> {
        let size = dt.type_size() as usize;
        let out = match dt {
            Datatype::FixedPoint { .. } | Datatype::Time { .. } => {
                dt.validate()?;
                let layout = IntLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                match numeric::encode_native_int(&layout, value) {
                    Some(bytes) => bytes,
                    None => numeric::encode_int(&layout, value)?,
                }
            }
            Datatype::FloatingPoint { .. } => {
                dt.validate()?;
                let layout =
                    FloatLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                numeric::encode_float(&layout, numeric::value_to_f64(value)?)?
            }
            Datatype::BitField { .. } => {
                dt.validate()?;
                let layout = BitLayout::of(dt).ok_or(FormatError::InvalidDatatypeClass(dt.class_id()))?;
                numeric::encode_bits(&layout, value)?
            }
            Datatype::String {
                padding, charset, ..
            } => {
                let text = expect_str(value)?;
                encode_text(text, size, *padding, *charset)?
            }
            Datatype::Opaque { .. } => match value {
                Value::Blob(b) if b.len() == size => b.clone(),
                Value::Blob(b) => {
                    return Err(FormatError::SizeMismatch {
                        expected: size,
                        actual: b.len(),
                    })
                }
                other => return Err(kind_mismatch("blob", other)),
            },
            Datatype::Compound { members, .. } => {
                let fields = value
                    .as_members()
                    .ok_or_else(|| kind_mismatch("compound", value))?;
                let mut buf = vec![0u8; size];
                for m in members {
                    let v = fields
                        .iter()
                        .find(|(name, _)| *name == m.name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| FormatError::MissingCompoundMember(m.name.clone()))?;
                    let bytes = if m.dimensions.is_empty() {
                        self.encode(&m.datatype, v)?
                    } else {
                        self.encode_elements(&m.datatype, v, m.element_count() as usize)?
                    };
                    let start = m.byte_offset as usize;
                    let end = start.saturating_add(bytes.len());
                    buf.get_mut(start..end)
                        .ok_or(FormatError::UnexpectedEof {
                            expected: end,
                            available: size,
                        })?
                        .copy_from_slice(&bytes);
                }
                buf
            }
            Datatype::Reference { ref_type, .. } => self.encode_reference(*ref_type, size, value)?,
            Datatype::Enumeration {
                base_type, members, ..
            } => match value {
                Value::Enum(name) | Value::String(name) => members
                    .iter()
                    .find(|m| m.name == *name)
                    .map(|m| m.value.clone())
                    .ok_or_else(|| FormatError::UnknownEnumName(name.clone()))?,
                _ => self.encode(base_type, value)?,
            },
            Datatype::VariableLength {
                is_string,
                padding,
                charset,
                base_type,
                ..
            } => {
                let (count, payload) = if *is_string {
                    let text = expect_str(value)?;
                    check_charset(text, charset.unwrap_or(CharacterSet::Ascii))?;
                    let mut payload = text.as_bytes().to_vec();
                    if padding == &Some(StringPadding::NullTerminate) && !payload.is_empty() {
                        payload.push(0);
                    }
                    (text.len(), payload)
                } else {
                    let elements = value
                        .as_elements()
                        .ok_or_else(|| kind_mismatch("sequence", value))?;
                    (elements.len(), self.encode_all(base_type, elements)?)
                };
                self.write_descriptor(size, count, &payload)?
            }
            Datatype::Array { base_type, dimensions, .. } => {
                let n = dimensions
                    .iter()
                    .try_fold(1usize, |n, &d| n.checked_mul(d as usize))
                    .ok_or(FormatError::InconsistentTypeSize {
                        declared: size as u64,
                        required: u64::MAX,
                    })?;
                self.encode_elements(base_type, value, n)?
            }
        };
        if out.len() != size {
            return Err(FormatError::SizeMismatch {
                expected: size,
                actual: out.len(),
            });
        }
        Ok(out)
    }

    /// Decode `bytes.len() / size` contiguous elements.
    pub fn decode_all(&self, dt: &Datatype, bytes: &[u8]) -> Result<Vec<Value>, FormatError> {
        let size = dt.type_size() as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        if bytes.len() % size != 0 {
            return Err(FormatError::SizeMismatch {
                expected: bytes.len().next_multiple_of(size),
                actual: bytes.len(),
            });
        }
        bytes.chunks_exact(size).map(|b| self.decode(dt, b)).collect()
    }

    /// Encode `values` back to back.
    pub fn encode_all(&self, dt: &Datatype, values: &[Value]) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::with_capacity(values.len() * dt.type_size() as usize);
        for v in values {
            out.extend(self.encode(dt, v)?);
        }
        Ok(out)
    }

    /// Decode one element straight into a typed record.
    pub fn decode_as<T: H5Type>(&self, bytes: &[u8]) -> Result<T, FormatError> {
        T::from_value(&self.decode(&T::datatype(), bytes)?)
    }

    /// Encode a typed record with its own datatype.
    pub fn encode_from<T: H5Type>(&self, value: &T) -> Result<Vec<u8>, FormatError> {
        self.encode(&T::datatype(), &value.to_value())
    }

    fn encode_elements(&self, base: &Datatype, value: &Value, n: usize) -> Result<Vec<u8>, FormatError> {
        let elements = value
            .as_elements()
            .ok_or_else(|| kind_mismatch("array", value))?;
        if elements.len() != n {
            return Err(FormatError::ElementCountMismatch {
                expected: n,
                actual: elements.len(),
            });
        }
        self.encode_all(base, elements)
    }

    fn resolve(&self, address: u64, id: u32) -> Result<Vec<u8>, FormatError> {
        self.heap.ok_or(FormatError::HeapNotAttached)?.resolve(address, id)
    }

    fn store(&self, payload: &[u8]) -> Result<(u64, u32), FormatError> {
        self.sink.ok_or(FormatError::HeapNotAttached)?.append(payload)
    }

    /// Store `payload` and lay out `{count, address, id}` in `size` bytes.
    fn write_descriptor(&self, size: usize, count: usize, payload: &[u8]) -> Result<Vec<u8>, FormatError> {
        let offset_size = descriptor_offset_size(size)?;
        let count = u32::try_from(count).map_err(|_| FormatError::ValueOutOfRange)?;
        let mut buf = Vec::with_capacity(size);
        buf.put_u32(count);
        if count == 0 {
            buf.put_zeros(offset_size as usize + 4);
            return Ok(buf);
        }
        let (address, id) = self.store(payload)?;
        buf.put_uint(address, offset_size as usize);
        buf.put_u32(id);
        Ok(buf)
    }

    fn decode_reference(&self, ref_type: ReferenceType, bytes: &[u8]) -> Result<Value, FormatError> {
        let reference = match ref_type {
            ReferenceType::Object => {
                let offset_size = offset_width(bytes.len())?;
                let address = ByteCursor::new(bytes).uint(offset_size as usize)?;
                Reference::object(address)
            }
            ReferenceType::DatasetRegion => {
                let offset_size = offset_width(bytes.len().saturating_sub(4))?;
                let mut c = ByteCursor::new(bytes);
                let address = c.uint(offset_size as usize)?;
                let id = c.u32()?;
                if id == 0 || is_undefined(address, offset_size) {
                    return Err(FormatError::UnresolvedReference(address));
                }
                decode_region_payload(&self.resolve(address, id)?, offset_size)?
            }
            _ => {
                let (len, address, id) = read_descriptor(bytes)?;
                if len == 0 {
                    return Err(FormatError::UnresolvedReference(address));
                }
                let payload = self.resolve(address, id)?;
                let (stored, reference) = decode_v4_payload(&payload)?;
                if stored != ref_type {
                    log::warn!("reference blob of type {stored:?} stored under a {ref_type:?} descriptor");
                }
                reference
            }
        };
        let target = match self.locator {
            Some(locator) if !is_undefined(reference.address(), 8) => {
                Some(locator.locate(reference.address())?)
            }
            _ => None,
        };
        Ok(Value::Reference { reference, target })
    }

    fn encode_reference(
        &self,
        ref_type: ReferenceType,
        size: usize,
        value: &Value,
    ) -> Result<Vec<u8>, FormatError> {
        let reference = match value {
            Value::Reference { reference, .. } => reference,
            other => return Err(kind_mismatch("reference", other)),
        };
        let mut buf = Vec::with_capacity(size);
        match (ref_type, reference) {
            (ReferenceType::Object, Reference::Object { address, .. }) => {
                buf.put_uint(*address, offset_width(size)? as usize);
            }
            (ReferenceType::DatasetRegion, Reference::Region { address, selection, .. }) => {
                let offset_size = offset_width(size.saturating_sub(4))?;
                let payload = encode_region_payload(*address, selection, offset_size)?;
                let (heap_address, id) = self.store(&payload)?;
                buf.put_uint(heap_address, offset_size as usize);
                buf.put_u32(id);
            }
            (ReferenceType::Object2, Reference::Object { .. })
            | (ReferenceType::DatasetRegion2, Reference::Region { .. })
            | (ReferenceType::Attribute, Reference::Attribute { .. }) => {
                let payload = encode_v4_payload(reference, V4_TOKEN_SIZE)?;
                buf = self.write_descriptor(size, payload.len(), &payload)?;
            }
            (_, other) => {
                return Err(FormatError::ValueKindMismatch {
                    expected: ref_kind_name(ref_type),
                    found: other.kind_name(),
                })
            }
        }
        Ok(buf)
    }
}

/// Decode one element with default properties and no heap.
pub fn decode(dt: &Datatype, bytes: &[u8]) -> Result<Value, FormatError> {
    Codec::default().decode(dt, bytes)
}

/// Encode one element with default properties and no heap.
pub fn encode(dt: &Datatype, value: &Value) -> Result<Vec<u8>, FormatError> {
    Codec::default().encode(dt, value)
}

fn check_size(dt: &Datatype, bytes: &[u8]) -> Result<(), FormatError> {
    let expected = dt.type_size() as usize;
    if bytes.len() != expected {
        return Err(FormatError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8], FormatError> {
    let end = start.saturating_add(len);
    bytes.get(start..end).ok_or(FormatError::UnexpectedEof {
        expected: end,
        available: bytes.len(),
    })
}

fn kind_mismatch(expected: &'static str, found: &Value) -> FormatError {
    FormatError::ValueKindMismatch {
        expected,
        found: found.kind_name(),
    }
}

fn ref_kind_name(ref_type: ReferenceType) -> &'static str {
    match ref_type {
        ReferenceType::Object | ReferenceType::Object2 => "object reference",
        ReferenceType::DatasetRegion | ReferenceType::DatasetRegion2 => "region reference",
        ReferenceType::Attribute => "attribute reference",
    }
}

fn expect_str(value: &Value) -> Result<&str, FormatError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(kind_mismatch("string", other)),
    }
}

fn offset_width(len: usize) -> Result<u8, FormatError> {
    match len {
        2 | 4 | 8 => Ok(len as u8),
        _ => Err(FormatError::InvalidOffsetSize(len.min(u8::MAX as usize) as u8)),
    }
}

/// Offset width of a `{u32, address, u32}` descriptor of `size` bytes.
fn descriptor_offset_size(size: usize) -> Result<u8, FormatError> {
    offset_width(size.saturating_sub(8))
}

fn read_descriptor(bytes: &[u8]) -> Result<(u32, u64, u32), FormatError> {
    let offset_size = descriptor_offset_size(bytes.len())?;
    let mut c = ByteCursor::new(bytes);
    Ok((c.u32()?, c.offset(offset_size)?, c.u32()?))
}

fn decode_text(bytes: &[u8], padding: StringPadding, charset: CharacterSet) -> String {
    let text = match padding {
        StringPadding::NullTerminate => bytes.split(|&b| b == 0).next().unwrap_or(bytes),
        StringPadding::NullPad => {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            &bytes[..end]
        }
        StringPadding::SpacePad => {
            let end = bytes.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |i| i + 1);
            &bytes[..end]
        }
    };
    match charset {
        CharacterSet::Ascii => text.iter().map(|&b| b as char).collect(),
        CharacterSet::Utf8 => String::from_utf8_lossy(text).to_string(),
    }
}

fn check_charset(text: &str, charset: CharacterSet) -> Result<(), FormatError> {
    if charset == CharacterSet::Ascii && !text.is_ascii() {
        return Err(FormatError::ValueOutOfRange);
    }
    Ok(())
}

fn encode_text(
    text: &str,
    size: usize,
    padding: StringPadding,
    charset: CharacterSet,
) -> Result<Vec<u8>, FormatError> {
    check_charset(text, charset)?;
    let bytes = text.as_bytes();
    // a null-terminated field keeps room for its terminator
    let capacity = match padding {
        StringPadding::NullTerminate => size.saturating_sub(1),
        StringPadding::NullPad | StringPadding::SpacePad => size,
    };
    if bytes.len() > capacity {
        return Err(FormatError::StringTooLong {
            capacity,
            length: bytes.len(),
        });
    }
    let fill = if padding == StringPadding::SpacePad { b' ' } else { 0 };
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(bytes);
    out.resize(size, fill);
    Ok(out)
}
