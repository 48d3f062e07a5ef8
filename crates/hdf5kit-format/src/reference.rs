//! Object, region and attribute references, and the dataspace selections
//! carried by region references.
//!
//! Version-1 object references are plain file addresses. Version-1 region
//! references point at a global heap object holding the target address
//! followed by a serialized selection. Version-4 references are encoded
//! blobs stored in the global heap behind a `{length, address, id}` triple.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::bytes::{ByteCursor, ByteWriter};
use crate::datatype::ReferenceType;
use crate::error::FormatError;

const SEL_NONE: u32 = 0;
const SEL_POINTS: u32 = 1;
const SEL_HYPERSLAB: u32 = 2;
const SEL_ALL: u32 = 3;

/// A selection over a dataspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Nothing selected.
    None,
    /// The whole dataspace.
    All,
    /// Individual elements, each a coordinate tuple of length `rank`.
    Points { rank: u32, points: Vec<Vec<u64>> },
    /// Rectangular blocks given by inclusive start and end corners.
    Hyperslab {
        rank: u32,
        blocks: Vec<(Vec<u64>, Vec<u64>)>,
    },
}

impl Selection {
    /// Number of elements selected, if it is known without the extent.
    pub fn element_count(&self) -> Option<u64> {
        match self {
            Selection::None => Some(0),
            Selection::All => None,
            Selection::Points { points, .. } => Some(points.len() as u64),
            Selection::Hyperslab { blocks, .. } => Some(
                blocks
                    .iter()
                    .map(|(start, end)| {
                        start
                            .iter()
                            .zip(end)
                            .map(|(s, e)| e.saturating_sub(*s).saturating_add(1))
                            .fold(1u64, u64::saturating_mul)
                    })
                    .fold(0u64, u64::saturating_add),
            ),
        }
    }

    /// Parse a serialized selection (version 1 point and hyperslab forms).
    pub fn parse(c: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        let selection_type = c.u32()?;
        let version = c.u32()?;
        let unsupported = FormatError::UnsupportedSelection {
            selection_type,
            version,
        };
        match selection_type {
            SEL_NONE | SEL_ALL => {
                // reserved(4) + length(4)
                c.skip(8)?;
                Ok(if selection_type == SEL_NONE {
                    Selection::None
                } else {
                    Selection::All
                })
            }
            SEL_POINTS | SEL_HYPERSLAB if version == 1 => {
                let _reserved = c.u32()?;
                let _length = c.u32()?;
                let rank = c.u32()?;
                let count = c.u32()? as usize;
                let mut coords = || -> Result<Vec<u64>, FormatError> {
                    (0..rank).map(|_| c.u32().map(u64::from)).collect()
                };
                if selection_type == SEL_POINTS {
                    let mut points = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        points.push(coords()?);
                    }
                    Ok(Selection::Points { rank, points })
                } else {
                    let mut blocks = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        let start = coords()?;
                        let end = coords()?;
                        blocks.push((start, end));
                    }
                    Ok(Selection::Hyperslab { rank, blocks })
                }
            }
            _ => Err(unsupported),
        }
    }

    /// Serialize in the version 1 encoding.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), FormatError> {
        let coord = |v: u64| u32::try_from(v).map_err(|_| FormatError::ValueOutOfRange);
        match self {
            Selection::None | Selection::All => {
                buf.put_u32(if matches!(self, Selection::None) {
                    SEL_NONE
                } else {
                    SEL_ALL
                });
                buf.put_u32(1);
                buf.put_u32(0);
                buf.put_u32(0);
            }
            Selection::Points { rank, points } => {
                buf.put_u32(SEL_POINTS);
                buf.put_u32(1);
                buf.put_u32(0);
                buf.put_u32(8 + points.len() as u32 * rank * 4);
                buf.put_u32(*rank);
                buf.put_u32(points.len() as u32);
                for p in points {
                    if p.len() != *rank as usize {
                        return Err(FormatError::ValueOutOfRange);
                    }
                    for &v in p {
                        buf.put_u32(coord(v)?);
                    }
                }
            }
            Selection::Hyperslab { rank, blocks } => {
                buf.put_u32(SEL_HYPERSLAB);
                buf.put_u32(1);
                buf.put_u32(0);
                buf.put_u32(8 + blocks.len() as u32 * rank * 8);
                buf.put_u32(*rank);
                buf.put_u32(blocks.len() as u32);
                for (start, end) in blocks {
                    if start.len() != *rank as usize || end.len() != *rank as usize {
                        return Err(FormatError::ValueOutOfRange);
                    }
                    for &v in start.iter().chain(end) {
                        buf.put_u32(coord(v)?);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A decoded reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// An object (group, dataset or named datatype) header address.
    Object {
        address: u64,
        /// External file name for version-4 references.
        file: Option<String>,
    },
    /// A selection within a dataset.
    Region {
        address: u64,
        selection: Selection,
        file: Option<String>,
    },
    /// A named attribute of an object.
    Attribute {
        address: u64,
        name: String,
        file: Option<String>,
    },
}

impl Reference {
    /// Object header address this reference points at.
    pub fn address(&self) -> u64 {
        match self {
            Reference::Object { address, .. }
            | Reference::Region { address, .. }
            | Reference::Attribute { address, .. } => *address,
        }
    }

    pub fn object(address: u64) -> Self {
        Reference::Object {
            address,
            file: None,
        }
    }

    pub fn region(address: u64, selection: Selection) -> Self {
        Reference::Region {
            address,
            selection,
            file: None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Reference::Object { .. } => "object reference",
            Reference::Region { .. } => "region reference",
            Reference::Attribute { .. } => "attribute reference",
        }
    }
}

/// Where a reference resolved to, as reported by an [`ObjectLocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Object header address.
    pub address: u64,
    /// Path of the object within the container, when known.
    pub path: Option<String>,
}

/// Resolves object header addresses for reference decode. Implemented by the
/// container layer that owns object headers.
pub trait ObjectLocator {
    fn locate(&self, address: u64) -> Result<ObjectLocation, FormatError>;
}

/// Decode a version-1 region reference heap payload: the object address
/// followed by a serialized selection.
pub fn decode_region_payload(payload: &[u8], offset_size: u8) -> Result<Reference, FormatError> {
    let mut c = ByteCursor::new(payload);
    let address = c.offset(offset_size)?;
    let selection = Selection::parse(&mut c)?;
    Ok(Reference::region(address, selection))
}

/// Encode a version-1 region reference heap payload.
pub fn encode_region_payload(
    address: u64,
    selection: &Selection,
    offset_size: u8,
) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    buf.put_uint(address, offset_size as usize);
    selection.serialize(&mut buf)?;
    Ok(buf)
}

const FLAG_EXTERNAL: u8 = 0x01;

/// Decode a version-4 reference blob.
pub fn decode_v4_payload(payload: &[u8]) -> Result<(ReferenceType, Reference), FormatError> {
    let mut c = ByteCursor::new(payload);
    let ref_type = ReferenceType::from_code(c.u8()?)?;
    if !ref_type.is_v4() {
        return Err(FormatError::InvalidReferenceType(ref_type.code()));
    }
    let flags = c.u8()?;
    let file = if flags & FLAG_EXTERNAL != 0 {
        let len = c.u16()? as usize;
        Some(String::from_utf8_lossy(c.take(len)?).into_owned())
    } else {
        None
    };
    let token_size = c.u8()? as usize;
    let token = c.take(token_size)?;
    let address = token
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i));
    let reference = match ref_type {
        ReferenceType::DatasetRegion2 => {
            let len = c.u32()? as usize;
            let mut sel = ByteCursor::new(c.take(len)?);
            Reference::Region {
                address,
                selection: Selection::parse(&mut sel)?,
                file,
            }
        }
        ReferenceType::Attribute => {
            let len = c.u16()? as usize;
            Reference::Attribute {
                address,
                name: String::from_utf8_lossy(c.take(len)?).into_owned(),
                file,
            }
        }
        _ => Reference::Object { address, file },
    };
    Ok((ref_type, reference))
}

/// Encode a version-4 reference blob with an address token of `token_size` bytes.
pub fn encode_v4_payload(reference: &Reference, token_size: u8) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    let (ref_type, file) = match reference {
        Reference::Object { file, .. } => (ReferenceType::Object2, file),
        Reference::Region { file, .. } => (ReferenceType::DatasetRegion2, file),
        Reference::Attribute { file, .. } => (ReferenceType::Attribute, file),
    };
    buf.put_u8(ref_type.code());
    buf.put_u8(if file.is_some() { FLAG_EXTERNAL } else { 0 });
    if let Some(name) = file {
        buf.put_u16(u16::try_from(name.len()).map_err(|_| FormatError::ValueOutOfRange)?);
        buf.extend_from_slice(name.as_bytes());
    }
    buf.put_u8(token_size);
    buf.put_uint(reference.address(), token_size.min(8) as usize);
    buf.put_zeros(token_size.saturating_sub(8) as usize);
    match reference {
        Reference::Region { selection, .. } => {
            let mut sel = Vec::new();
            selection.serialize(&mut sel)?;
            buf.put_u32(sel.len() as u32);
            buf.extend_from_slice(&sel);
        }
        Reference::Attribute { name, .. } => {
            buf.put_u16(u16::try_from(name.len()).map_err(|_| FormatError::ValueOutOfRange)?);
            buf.extend_from_slice(name.as_bytes());
        }
        Reference::Object { .. } => {}
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperslab_payload() {
        let mut payload = 0x800u64.to_le_bytes().to_vec();
        for v in [2u32, 1, 0, 24, 2, 1, 0, 1, 2, 3] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let r = decode_region_payload(&payload, 8).unwrap();
        match &r {
            Reference::Region {
                address, selection, ..
            } => {
                assert_eq!(*address, 0x800);
                assert_eq!(
                    *selection,
                    Selection::Hyperslab {
                        rank: 2,
                        blocks: vec![(vec![0, 1], vec![2, 3])]
                    }
                );
                assert_eq!(selection.element_count(), Some(9));
            }
            other => panic!("expected Region, got {other:?}"),
        }
    }

    #[test]
    fn points_serialize_parse() {
        let sel = Selection::Points {
            rank: 1,
            points: vec![vec![3], vec![7], vec![9]],
        };
        let payload = encode_region_payload(0x40, &sel, 4).unwrap();
        let r = decode_region_payload(&payload, 4).unwrap();
        assert_eq!(r, Reference::region(0x40, sel));
    }

    #[test]
    fn selection_v2_unsupported() {
        let mut buf = Vec::new();
        for v in [1u32, 2, 0, 0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let err = Selection::parse(&mut ByteCursor::new(&buf)).unwrap_err();
        assert_eq!(
            err,
            FormatError::UnsupportedSelection {
                selection_type: 1,
                version: 2
            }
        );
    }

    #[test]
    fn v4_attribute_with_external_file() {
        let r = Reference::Attribute {
            address: 0x1234,
            name: "units".into(),
            file: Some("other.h5".into()),
        };
        let blob = encode_v4_payload(&r, 8).unwrap();
        assert_eq!(blob[0], 4);
        assert_eq!(blob[1], FLAG_EXTERNAL);
        let (ty, back) = decode_v4_payload(&blob).unwrap();
        assert_eq!(ty, ReferenceType::Attribute);
        assert_eq!(back, r);
    }

    #[test]
    fn v4_region_reference() {
        let r = Reference::region(0x99, Selection::All);
        let (ty, back) = decode_v4_payload(&encode_v4_payload(&r, 8).unwrap()).unwrap();
        assert_eq!(ty, ReferenceType::DatasetRegion2);
        assert_eq!(back, r);
    }

    #[test]
    fn coordinate_overflow_rejected() {
        let sel = Selection::Points {
            rank: 1,
            points: vec![vec![u64::MAX]],
        };
        assert_eq!(
            encode_region_payload(0, &sel, 8).unwrap_err(),
            FormatError::ValueOutOfRange
        );
    }
}
