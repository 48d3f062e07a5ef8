//! HDF5 global heap collections (`GCOL`): parsing, serialization and the
//! single-block allocator used for variable-length payloads.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use crate::bytes::{pad8, ByteCursor, ByteWriter};
use crate::error::FormatError;

/// Magic signature for global heap collections.
pub const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Largest valid object id; id 0 is the free-space record.
pub const MAX_OBJECT_ID: u32 = 65535;

/// Source of global heap payloads, addressed by collection address and
/// object id.
pub trait HeapSource {
    fn resolve(&self, address: u64, id: u32) -> Result<Vec<u8>, FormatError>;
}

/// Destination for new global heap payloads. Returns the collection address
/// and object id the payload was stored under.
pub trait HeapSink {
    fn append(&self, payload: &[u8]) -> Result<(u64, u32), FormatError>;
}

/// Reject the free-space id and ids beyond the 16-bit range.
pub fn check_object_id(id: u64) -> Result<u16, FormatError> {
    match id {
        0 => Err(FormatError::HeapObjectIdZero),
        1..=0xFFFF => Ok(id as u16),
        _ => Err(FormatError::HeapObjectIdOutOfRange(id)),
    }
}

/// A single object within a global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// Object index (1-based; 0 is the free space marker).
    pub index: u16,
    /// Reference count.
    pub reference_count: u16,
    /// Object data.
    pub data: Vec<u8>,
}

/// A global heap collection: a fixed-capacity block of heap objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    /// File address of the collection.
    pub address: u64,
    /// Total size of this collection including header.
    pub collection_size: u64,
    length_size: u8,
    objects: BTreeMap<u16, GlobalHeapObject>,
    next_id: u32,
    used: u64,
}

impl GlobalHeapCollection {
    /// Empty collection of `capacity` bytes at `address`.
    pub fn new(address: u64, capacity: u64, length_size: u8) -> Result<Self, FormatError> {
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        let header = Self::header_size(length_size) as u64;
        if capacity < header {
            return Err(FormatError::HeapBlockFull {
                needed: header,
                free: capacity,
            });
        }
        Ok(Self {
            address,
            collection_size: capacity,
            length_size,
            objects: BTreeMap::new(),
            next_id: 1,
            used: header,
        })
    }

    /// signature(4) + version(1) + reserved(3) + collection size
    pub fn header_size(length_size: u8) -> usize {
        8 + length_size as usize
    }

    /// id(2) + refcount(2) + reserved(4) + size
    pub fn object_header_size(length_size: u8) -> usize {
        8 + length_size as usize
    }

    /// Parse a global heap collection at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        length_size: u8,
    ) -> Result<GlobalHeapCollection, FormatError> {
        let mut c = ByteCursor::at(file_data, offset)?;
        if c.signature()? != GCOL_SIGNATURE {
            return Err(FormatError::InvalidGlobalHeapSignature);
        }
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::InvalidGlobalHeapVersion(version));
        }
        c.skip(3)?;
        let collection_size = c.length(length_size)?;
        let end = offset.saturating_add(collection_size as usize);
        let obj_header = Self::object_header_size(length_size);

        let mut heap = Self {
            address: offset as u64,
            collection_size,
            length_size,
            objects: BTreeMap::new(),
            next_id: 1,
            used: Self::header_size(length_size) as u64,
        };

        while c.position() + obj_header <= end {
            let index = c.u16()?;
            let reference_count = c.u16()?;
            c.skip(4)?;
            let size = c.length(length_size)?;
            if index == 0 {
                // free space record; its size covers the rest of the collection
                break;
            }
            let data = c.take(size as usize)?.to_vec();
            c.skip(pad8(size as usize) - size as usize)?;
            heap.used += (obj_header + pad8(size as usize)) as u64;
            heap.next_id = heap.next_id.max(index as u32 + 1);
            heap.objects.insert(
                index,
                GlobalHeapObject {
                    index,
                    reference_count,
                    data,
                },
            );
        }
        log::trace!(
            "GCOL @{offset:#x}: {} objects, {} bytes free",
            heap.objects.len(),
            heap.free_space()
        );
        Ok(heap)
    }

    /// Serialize the collection, compacting live objects and writing the
    /// free-space record when it fits.
    pub fn serialize(&self) -> Vec<u8> {
        let ls = self.length_size as usize;
        let mut buf = Vec::with_capacity(self.collection_size as usize);
        buf.extend_from_slice(&GCOL_SIGNATURE);
        buf.put_u8(1);
        buf.put_zeros(3);
        buf.put_uint(self.collection_size, ls);
        for obj in self.objects.values() {
            buf.put_u16(obj.index);
            buf.put_u16(obj.reference_count);
            buf.put_zeros(4);
            buf.put_uint(obj.data.len() as u64, ls);
            buf.extend_from_slice(&obj.data);
            buf.put_zeros(pad8(obj.data.len()) - obj.data.len());
        }
        let free = self.free_space();
        if free >= Self::object_header_size(self.length_size) as u64 {
            buf.put_u16(0);
            buf.put_u16(0);
            buf.put_zeros(4);
            buf.put_uint(free, ls);
        }
        buf.resize(self.collection_size as usize, 0);
        buf
    }

    /// Bytes not yet occupied by the header or live objects.
    pub fn free_space(&self) -> u64 {
        self.collection_size.saturating_sub(self.used)
    }

    /// Bytes an object with a `len`-byte payload occupies in the collection.
    pub fn object_footprint(&self, len: usize) -> u64 {
        (Self::object_header_size(self.length_size) + pad8(len)) as u64
    }

    /// Store `payload` as a new object with reference count 1.
    pub fn append(&mut self, payload: &[u8]) -> Result<u16, FormatError> {
        if self.next_id > MAX_OBJECT_ID {
            return Err(FormatError::HeapIdsExhausted);
        }
        let needed = self.object_footprint(payload.len());
        let free = self.free_space();
        if needed > free {
            return Err(FormatError::HeapBlockFull { needed, free });
        }
        let index = self.next_id as u16;
        self.objects.insert(
            index,
            GlobalHeapObject {
                index,
                reference_count: 1,
                data: payload.to_vec(),
            },
        );
        self.next_id += 1;
        self.used += needed;
        Ok(index)
    }

    /// Whether another object id can still be handed out.
    pub fn ids_available(&self) -> bool {
        self.next_id <= MAX_OBJECT_ID
    }

    /// Get an object by its index.
    pub fn get_object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.get(&index)
    }

    /// Payload of object `id`, validating the id range.
    pub fn resolve(&self, id: u64) -> Result<&[u8], FormatError> {
        let index = check_object_id(id)?;
        self.objects
            .get(&index)
            .map(|o| o.data.as_slice())
            .ok_or(FormatError::GlobalHeapObjectNotFound {
                collection_address: self.address,
                index,
            })
    }

    pub fn increment_ref(&mut self, id: u16) -> Result<u16, FormatError> {
        let address = self.address;
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(FormatError::GlobalHeapObjectNotFound {
                collection_address: address,
                index: id,
            })?;
        obj.reference_count = obj.reference_count.saturating_add(1);
        Ok(obj.reference_count)
    }

    /// Drop one reference; the object is removed and its space returned to
    /// the free record when the count reaches zero.
    pub fn decrement_ref(&mut self, id: u16) -> Result<u16, FormatError> {
        let address = self.address;
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(FormatError::GlobalHeapObjectNotFound {
                collection_address: address,
                index: id,
            })?;
        obj.reference_count = obj.reference_count.saturating_sub(1);
        let remaining = obj.reference_count;
        if remaining == 0 {
            if let Some(removed) = self.objects.remove(&id) {
                self.used -= self.object_footprint(removed.data.len());
            }
        }
        Ok(remaining)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Live objects in id order.
    pub fn objects(&self) -> impl Iterator<Item = &GlobalHeapObject> {
        self.objects.values()
    }
}

impl HeapSource for GlobalHeapCollection {
    fn resolve(&self, address: u64, id: u32) -> Result<Vec<u8>, FormatError> {
        if address != self.address {
            return Err(FormatError::HeapBlockNotFound(address));
        }
        GlobalHeapCollection::resolve(self, id as u64).map(<[u8]>::to_vec)
    }
}
