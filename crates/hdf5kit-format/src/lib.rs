//! Pure-Rust HDF5 binary format engine.
//!
//! The crate covers the parts of the format that sit below files, groups and
//! datasets:
//!
//! - [`datatype`] descriptors and the [`codec`] that turns element bytes into
//!   [`value::Value`]s and back, including variable-length data and
//!   references resolved through heaps.
//! - Heaps: [`global_heap`] collections (with a shared, lazily loaded
//!   [`heap_store`] under `std`) and [`local_heap`] name storage.
//! - Indices: [`btree_v1`] group and chunk trees (with a builder in
//!   [`btree_v1_writer`]) and [`btree_v2`] link/attribute trees.
//! - The chunk [`filters`] pipeline: deflate, shuffle, fletcher32, n-bit and
//!   scale-offset, and [`chunked_read`] on top of it.
//!
//! Everything works on in-memory byte images; the container layer owns file
//! I/O. The crate supports `no_std` environments with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// lets `#[derive(H5Type)]` expansions name this crate from inside it
extern crate self as hdf5kit_format;

pub mod btree_v1;
pub mod btree_v1_writer;
pub mod btree_v2;
pub mod bytes;
pub mod checksum;
pub mod chunked_read;
pub mod codec;
pub mod datatype;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod global_heap;
#[cfg(feature = "std")]
pub mod heap_store;
pub mod local_heap;
pub mod nbit;
pub mod numeric;
pub mod property_list;
pub mod record;
pub mod reference;
pub mod scale_offset;
pub mod symbol_table;
pub mod type_builders;
pub mod value;

pub use codec::Codec;
pub use datatype::Datatype;
pub use error::{ErrorKind, FormatError};
pub use record::H5Type;
pub use value::Value;
