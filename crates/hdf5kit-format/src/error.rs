//! Error types for the HDF5 format engine.

use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::string::String;

/// Broad failure category, used by container layers to decide whether a
/// failure aborts a scan or only the current object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported structure. Fatal for the current parse.
    Format,
    /// Fewer bytes available than a structure declares.
    Truncation,
    /// A value's byte span does not match its descriptor's size.
    SizeMismatch,
    /// A filter id with no registered implementation.
    UnsupportedFilter,
    /// Checksum failure or undecodable chunk payload.
    CorruptChunk,
    /// Heap allocation or lookup failure.
    Heap,
    /// A value does not fit the descriptor it is encoded with.
    Value,
}

/// Errors that can occur when parsing, decoding or encoding HDF5 structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// Metadata checksum mismatch (Jenkins lookup3).
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Datatype class nibble outside 0..=10.
    InvalidDatatypeClass(u8),
    /// Datatype version not valid for its class.
    InvalidDatatypeVersion {
        /// Datatype class.
        class: u8,
        /// Version nibble found.
        version: u8,
    },
    /// Byte-order bits select the reserved combination.
    ReservedByteOrder,
    /// VAX floating-point byte order.
    VaxByteOrderUnsupported,
    /// Array or compound member permutation that is not the identity.
    NonIdentityPermutation,
    /// Declared datatype size disagrees with its structure.
    InconsistentTypeSize {
        /// Size declared by the descriptor.
        declared: u64,
        /// Size required by the members, dimensions or precision.
        required: u64,
    },
    /// Two compound members occupy overlapping byte ranges.
    OverlappingCompoundMembers {
        /// First member name.
        first: String,
        /// Second member name.
        second: String,
    },
    /// Unknown string padding type.
    InvalidStringPadding(u8),
    /// Unknown character set.
    InvalidCharacterSet(u8),
    /// Unknown reference type.
    InvalidReferenceType(u8),
    /// Unknown variable-length type.
    InvalidVariableLengthType(u8),
    /// Dataspace selection type or version that cannot be decoded.
    UnsupportedSelection {
        /// Selection type code.
        selection_type: u32,
        /// Selection encoding version.
        version: u32,
    },
    /// A byte span whose length differs from the descriptor size.
    SizeMismatch {
        /// Size the descriptor declares.
        expected: usize,
        /// Size of the span supplied.
        actual: usize,
    },
    /// A value whose shape does not fit the descriptor.
    ValueKindMismatch {
        /// What the descriptor expects.
        expected: &'static str,
        /// What was supplied.
        found: &'static str,
    },
    /// Numeric value outside the range the descriptor can represent.
    ValueOutOfRange,
    /// Array or sequence value with the wrong number of elements.
    ElementCountMismatch {
        /// Elements the descriptor holds.
        expected: usize,
        /// Elements supplied.
        actual: usize,
    },
    /// Element width beyond what the numeric converter supports.
    UnsupportedWidth(u32),
    /// String longer than a fixed-length string field.
    StringTooLong {
        /// Field width in bytes.
        capacity: usize,
        /// Encoded string length.
        length: usize,
    },
    /// A compound member missing from the supplied value.
    MissingCompoundMember(String),
    /// Enum bytes with no table entry, raised under the strict policy.
    UndefinedEnumValue,
    /// Enum name not present in the table.
    UnknownEnumName(String),
    /// Reference target could not be resolved.
    UnresolvedReference(u64),
    /// Invalid B-tree v1 signature.
    InvalidBTreeSignature,
    /// Invalid B-tree v1 node type.
    InvalidBTreeNodeType(u8),
    /// Invalid B-tree v2 signature.
    InvalidBTreeV2Signature,
    /// Unsupported B-tree v2 version.
    InvalidBTreeV2Version(u8),
    /// B-tree v2 node parameters that cannot hold a single record.
    InvalidBTreeV2Geometry {
        /// Node size in bytes.
        node_size: u32,
        /// Record size in bytes.
        record_size: u16,
    },
    /// Invalid global heap collection signature.
    InvalidGlobalHeapSignature,
    /// Unsupported global heap collection version.
    InvalidGlobalHeapVersion(u8),
    /// Object id missing from a loaded collection.
    GlobalHeapObjectNotFound {
        /// Collection address.
        collection_address: u64,
        /// Object id requested.
        index: u16,
    },
    /// Object id 0 denotes free space and never carries a payload.
    HeapObjectIdZero,
    /// Object id outside `1..=65535`.
    HeapObjectIdOutOfRange(u64),
    /// No collection at this address, even after invoking the loader.
    HeapBlockNotFound(u64),
    /// Payload does not fit in the remaining free space of a collection.
    HeapBlockFull {
        /// Bytes needed including object header and padding.
        needed: u64,
        /// Bytes remaining.
        free: u64,
    },
    /// A collection already issued object id 65535.
    HeapIdsExhausted,
    /// Variable-length or region data decoded without an attached heap.
    HeapNotAttached,
    /// Invalid local heap signature.
    InvalidLocalHeapSignature,
    /// Unsupported local heap version.
    InvalidLocalHeapVersion(u8),
    /// Invalid symbol table node signature.
    InvalidSymbolTableNodeSignature,
    /// Unsupported symbol table node version.
    InvalidSymbolTableNodeVersion(u8),
    /// Unsupported filter pipeline message version.
    InvalidFilterPipelineVersion(u8),
    /// Filter id with no implementation.
    UnsupportedFilter(u16),
    /// Filter parameters or input that a stage cannot process.
    FilterError(String),
    /// Fletcher-32 checksum mismatch: the chunk is corrupt.
    Fletcher32Mismatch {
        /// Checksum stored after the chunk payload.
        expected: u32,
        /// Checksum computed over the payload.
        computed: u32,
    },
    /// Inflate failure.
    DecompressionError(String),
    /// Deflate failure.
    CompressionError(String),
    /// A group member name that is not present.
    PathNotFound(String),
    /// A link name already present in the group.
    DuplicateLink(String),
    /// Chunk coordinates with no entry in the chunk index.
    ChunkNotFound,
}

impl FormatError {
    /// Triage category of this error.
    pub fn kind(&self) -> ErrorKind {
        use FormatError::*;
        match self {
            UnexpectedEof { .. } => ErrorKind::Truncation,
            SizeMismatch { .. } => ErrorKind::SizeMismatch,
            UnsupportedFilter(_) => ErrorKind::UnsupportedFilter,
            Fletcher32Mismatch { .. } | DecompressionError(_) | FilterError(_) => {
                ErrorKind::CorruptChunk
            }
            HeapObjectIdZero
            | HeapObjectIdOutOfRange(_)
            | HeapBlockNotFound(_)
            | HeapBlockFull { .. }
            | HeapIdsExhausted
            | HeapNotAttached
            | GlobalHeapObjectNotFound { .. } => ErrorKind::Heap,
            ValueKindMismatch { .. }
            | ValueOutOfRange
            | ElementCountMismatch { .. }
            | StringTooLong { .. }
            | MissingCompoundMember(_)
            | UndefinedEnumValue
            | UnknownEnumName(_)
            | CompressionError(_) => ErrorKind::Value,
            _ => ErrorKind::Format,
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::InvalidDatatypeClass(c) => write!(f, "invalid datatype class: {c}"),
            FormatError::InvalidDatatypeVersion { class, version } => {
                write!(f, "invalid version {version} for datatype class {class}")
            }
            FormatError::ReservedByteOrder => write!(f, "reserved byte order"),
            FormatError::VaxByteOrderUnsupported => {
                write!(f, "VAX floating-point byte order is not supported")
            }
            FormatError::NonIdentityPermutation => {
                write!(f, "dimension permutation is not the identity")
            }
            FormatError::InconsistentTypeSize { declared, required } => {
                write!(
                    f,
                    "datatype declares {declared} bytes but its layout requires {required}"
                )
            }
            FormatError::OverlappingCompoundMembers { first, second } => {
                write!(f, "compound members '{first}' and '{second}' overlap")
            }
            FormatError::InvalidStringPadding(p) => write!(f, "invalid string padding: {p}"),
            FormatError::InvalidCharacterSet(c) => write!(f, "invalid character set: {c}"),
            FormatError::InvalidReferenceType(t) => write!(f, "invalid reference type: {t}"),
            FormatError::InvalidVariableLengthType(t) => {
                write!(f, "invalid variable-length type: {t}")
            }
            FormatError::UnsupportedSelection {
                selection_type,
                version,
            } => {
                write!(
                    f,
                    "unsupported dataspace selection type {selection_type} version {version}"
                )
            }
            FormatError::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: descriptor is {expected} bytes, got {actual}")
            }
            FormatError::ValueKindMismatch { expected, found } => {
                write!(f, "value mismatch: expected {expected}, found {found}")
            }
            FormatError::ValueOutOfRange => write!(f, "value out of range for datatype"),
            FormatError::ElementCountMismatch { expected, actual } => {
                write!(f, "expected {expected} elements, got {actual}")
            }
            FormatError::UnsupportedWidth(size) => {
                write!(f, "{size}-byte elements are not supported")
            }
            FormatError::StringTooLong { capacity, length } => {
                write!(f, "string of {length} bytes exceeds field of {capacity}")
            }
            FormatError::MissingCompoundMember(name) => {
                write!(f, "compound member '{name}' missing from value")
            }
            FormatError::UndefinedEnumValue => write!(f, "enum value not in table"),
            FormatError::UnknownEnumName(name) => write!(f, "unknown enum name '{name}'"),
            FormatError::UnresolvedReference(addr) => {
                write!(f, "reference target {addr:#x} could not be resolved")
            }
            FormatError::InvalidBTreeSignature => write!(f, "invalid B-tree v1 signature"),
            FormatError::InvalidBTreeNodeType(t) => write!(f, "invalid B-tree v1 node type: {t}"),
            FormatError::InvalidBTreeV2Signature => write!(f, "invalid B-tree v2 signature"),
            FormatError::InvalidBTreeV2Version(v) => write!(f, "invalid B-tree v2 version: {v}"),
            FormatError::InvalidBTreeV2Geometry {
                node_size,
                record_size,
            } => {
                write!(
                    f,
                    "B-tree v2 node size {node_size} cannot hold records of {record_size} bytes"
                )
            }
            FormatError::InvalidGlobalHeapSignature => {
                write!(f, "invalid global heap collection signature")
            }
            FormatError::InvalidGlobalHeapVersion(v) => {
                write!(f, "invalid global heap collection version: {v}")
            }
            FormatError::GlobalHeapObjectNotFound {
                collection_address,
                index,
            } => {
                write!(
                    f,
                    "global heap object {index} not found in collection at {collection_address:#x}"
                )
            }
            FormatError::HeapObjectIdZero => {
                write!(f, "heap object id 0 is the free-space record")
            }
            FormatError::HeapObjectIdOutOfRange(id) => {
                write!(f, "heap object id {id} outside 1..=65535")
            }
            FormatError::HeapBlockNotFound(addr) => {
                write!(f, "no global heap collection at {addr:#x}")
            }
            FormatError::HeapBlockFull { needed, free } => {
                write!(f, "heap block full: need {needed} bytes, {free} free")
            }
            FormatError::HeapIdsExhausted => write!(f, "heap block has issued all 65535 ids"),
            FormatError::HeapNotAttached => {
                write!(f, "no global heap attached for variable-length decode")
            }
            FormatError::InvalidLocalHeapSignature => write!(f, "invalid local heap signature"),
            FormatError::InvalidLocalHeapVersion(v) => {
                write!(f, "invalid local heap version: {v}")
            }
            FormatError::InvalidSymbolTableNodeSignature => {
                write!(f, "invalid symbol table node signature")
            }
            FormatError::InvalidSymbolTableNodeVersion(v) => {
                write!(f, "invalid symbol table node version: {v}")
            }
            FormatError::InvalidFilterPipelineVersion(v) => {
                write!(f, "invalid filter pipeline version: {v}")
            }
            FormatError::UnsupportedFilter(id) => write!(f, "unsupported filter: {id}"),
            FormatError::FilterError(msg) => write!(f, "filter error: {msg}"),
            FormatError::Fletcher32Mismatch { expected, computed } => {
                write!(
                    f,
                    "corrupt chunk: fletcher32 expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::DecompressionError(msg) => write!(f, "decompression error: {msg}"),
            FormatError::CompressionError(msg) => write!(f, "compression error: {msg}"),
            FormatError::PathNotFound(name) => write!(f, "path not found: {name}"),
            FormatError::DuplicateLink(name) => write!(f, "link '{name}' already exists"),
            FormatError::ChunkNotFound => write!(f, "chunk not present in index"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}
