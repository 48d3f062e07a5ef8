//! Property lists configuring the codec, heaps, B-tree builders and filters.
//!
//! Each list is a plain value with a `Default` and chained setters, so a
//! container layer can build one per file and pass it down by reference.

#[cfg(not(feature = "std"))]
use alloc::string::{String, ToString};

use crate::error::FormatError;

/// How enum decode treats a byte pattern that has no table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPolicy {
    /// Decode to the configured sentinel name and log a warning.
    #[default]
    Sentinel,
    /// Fail with [`FormatError::UndefinedEnumValue`].
    Strict,
}

/// Datatype codec properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecProps {
    /// Size of file addresses in bytes (default: 8).
    pub offset_size: u8,
    /// Size of length fields in bytes (default: 8).
    pub length_size: u8,
    /// Handling of enum values missing from the table.
    pub enum_policy: EnumPolicy,
    /// Name produced under [`EnumPolicy::Sentinel`].
    pub undefined_enum_name: String,
}

impl Default for CodecProps {
    fn default() -> Self {
        Self {
            offset_size: 8,
            length_size: 8,
            enum_policy: EnumPolicy::Sentinel,
            undefined_enum_name: "undefined".to_string(),
        }
    }
}

impl CodecProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set offset and length sizes.
    pub fn sizes(mut self, offset_size: u8, length_size: u8) -> Self {
        self.offset_size = offset_size;
        self.length_size = length_size;
        self
    }

    /// Fail on enum values missing from the table.
    pub fn strict_enums(mut self) -> Self {
        self.enum_policy = EnumPolicy::Strict;
        self
    }

    pub fn undefined_enum_name(mut self, name: &str) -> Self {
        self.undefined_enum_name = name.to_string();
        self
    }

    /// Check that offset and length sizes are 2, 4, or 8.
    pub fn validate(&self) -> Result<(), FormatError> {
        if !matches!(self.offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(self.offset_size));
        }
        if !matches!(self.length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(self.length_size));
        }
        Ok(())
    }
}

/// Minimum size of a newly created global heap collection.
pub const MIN_GLOBAL_HEAP_SIZE: u64 = 4096;

/// Heap store properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapProps {
    /// Capacity of each new global heap collection (default: 4096).
    pub block_capacity: u64,
    /// Initial data segment size for new local heaps (default: 88).
    pub local_heap_initial_size: u64,
    pub offset_size: u8,
    pub length_size: u8,
}

impl Default for HeapProps {
    fn default() -> Self {
        Self {
            block_capacity: MIN_GLOBAL_HEAP_SIZE,
            local_heap_initial_size: 88,
            offset_size: 8,
            length_size: 8,
        }
    }
}

impl HeapProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set global heap collection capacity; values below 4096 are raised to 4096.
    pub fn block_capacity(mut self, bytes: u64) -> Self {
        self.block_capacity = bytes.max(MIN_GLOBAL_HEAP_SIZE);
        self
    }

    pub fn local_heap_initial_size(mut self, bytes: u64) -> Self {
        self.local_heap_initial_size = bytes.max(8);
        self
    }

    pub fn sizes(mut self, offset_size: u8, length_size: u8) -> Self {
        self.offset_size = offset_size;
        self.length_size = length_size;
        self
    }
}

/// B-tree v1 node fan-out ("K values").
///
/// A group leaf (symbol table node) holds up to `2 * group_leaf_k` entries;
/// internal nodes hold up to `2 * K` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeProps {
    /// Group symbol table node K (default: 4).
    pub group_leaf_k: u16,
    /// Group B-tree internal node K (default: 16).
    pub group_internal_k: u16,
    /// Chunk index node K (default: 32).
    pub chunk_k: u16,
    pub offset_size: u8,
    pub length_size: u8,
}

impl Default for BTreeProps {
    fn default() -> Self {
        Self {
            group_leaf_k: 4,
            group_internal_k: 16,
            chunk_k: 32,
            offset_size: 8,
            length_size: 8,
        }
    }
}

impl BTreeProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_leaf_k(mut self, k: u16) -> Self {
        self.group_leaf_k = k.max(1);
        self
    }

    pub fn group_internal_k(mut self, k: u16) -> Self {
        self.group_internal_k = k.max(1);
        self
    }

    pub fn chunk_k(mut self, k: u16) -> Self {
        self.chunk_k = k.max(1);
        self
    }

    pub fn sizes(mut self, offset_size: u8, length_size: u8) -> Self {
        self.offset_size = offset_size;
        self.length_size = length_size;
        self
    }
}

/// Chunk filter properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterProps {
    /// Deflate level used when a description carries none (default: 6).
    pub deflate_level: u32,
}

impl Default for FilterProps {
    fn default() -> Self {
        Self { deflate_level: 6 }
    }
}

impl FilterProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set deflate level (clamped to 0-9).
    pub fn deflate_level(mut self, level: u32) -> Self {
        self.deflate_level = level.min(9);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_defaults() {
        let props = CodecProps::new();
        assert_eq!(props.offset_size, 8);
        assert_eq!(props.enum_policy, EnumPolicy::Sentinel);
        assert_eq!(props.undefined_enum_name, "undefined");
        assert!(props.validate().is_ok());
    }

    #[test]
    fn codec_builder_chain() {
        let props = CodecProps::new()
            .sizes(4, 4)
            .strict_enums()
            .undefined_enum_name("?");
        assert_eq!(props.offset_size, 4);
        assert_eq!(props.enum_policy, EnumPolicy::Strict);
        assert_eq!(props.undefined_enum_name, "?");
    }

    #[test]
    fn codec_rejects_bad_sizes() {
        assert_eq!(
            CodecProps::new().sizes(3, 8).validate(),
            Err(FormatError::InvalidOffsetSize(3))
        );
    }

    #[test]
    fn heap_capacity_floor() {
        assert_eq!(HeapProps::new().block_capacity(100).block_capacity, 4096);
        assert_eq!(HeapProps::new().block_capacity(1 << 20).block_capacity, 1 << 20);
    }

    #[test]
    fn btree_defaults() {
        let props = BTreeProps::new();
        assert_eq!(props.group_leaf_k, 4);
        assert_eq!(props.group_internal_k, 16);
        assert_eq!(props.chunk_k, 32);
        assert_eq!(BTreeProps::new().chunk_k(0).chunk_k, 1);
    }

    #[test]
    fn filter_level_clamped() {
        assert_eq!(FilterProps::new().deflate_level(12).deflate_level, 9);
    }
}
