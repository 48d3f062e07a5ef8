//! Shared global heap store: lazily loaded collections keyed by file address,
//! plus the append path used when encoding variable-length data.
//!
//! All block state lives behind one mutex, so "check cache, else load, else
//! insert" is a single critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::FormatError;
use crate::global_heap::{check_object_id, GlobalHeapCollection, HeapSink, HeapSource};
use crate::property_list::HeapProps;

/// Loads the collection at a file address, or `None` when nothing is there.
pub type BlockLoader =
    Box<dyn Fn(u64) -> Result<Option<GlobalHeapCollection>, FormatError> + Send + Sync>;

/// Reserves `capacity` bytes for a new collection and returns its address.
pub type BlockAllocator = Box<dyn Fn(u64) -> Result<u64, FormatError> + Send + Sync>;

/// Address handed to the first block when no allocator is installed.
const SYNTHETIC_BASE: u64 = 4096;

#[derive(Default)]
struct StoreState {
    blocks: HashMap<u64, GlobalHeapCollection>,
    /// Block that receives appends.
    current: Option<u64>,
    next_synthetic: u64,
    dirty: Vec<u64>,
}

/// Global heap cache shared by decode and encode calls.
pub struct GlobalHeapStore {
    props: HeapProps,
    state: Mutex<StoreState>,
    loader: Option<BlockLoader>,
    allocator: Option<BlockAllocator>,
}

impl GlobalHeapStore {
    pub fn new(props: HeapProps) -> Self {
        Self {
            props,
            state: Mutex::new(StoreState {
                next_synthetic: SYNTHETIC_BASE,
                ..StoreState::default()
            }),
            loader: None,
            allocator: None,
        }
    }

    /// Store whose blocks are parsed on demand from an in-memory file image.
    pub fn over_image(image: Arc<[u8]>, props: HeapProps) -> Self {
        let length_size = props.length_size;
        Self::new(props).with_loader(move |address| {
            let offset = usize::try_from(address).map_err(|_| FormatError::HeapBlockNotFound(address))?;
            if offset >= image.len() {
                return Ok(None);
            }
            GlobalHeapCollection::parse(&image, offset, length_size).map(Some)
        })
    }

    pub fn with_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(u64) -> Result<Option<GlobalHeapCollection>, FormatError> + Send + Sync + 'static,
    {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Without an allocator, new blocks get consecutive synthetic addresses
    /// starting at 4096.
    pub fn with_allocator<F>(mut self, allocator: F) -> Self
    where
        F: Fn(u64) -> Result<u64, FormatError> + Send + Sync + 'static,
    {
        self.allocator = Some(Box::new(allocator));
        self
    }

    pub fn props(&self) -> &HeapProps {
        &self.props
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // a panic while holding the lock leaves the map itself consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an already materialized collection to the cache.
    pub fn insert_block(&self, block: GlobalHeapCollection) {
        self.lock().blocks.insert(block.address, block);
    }

    /// Whether the collection at `address` is cached.
    pub fn is_loaded(&self, address: u64) -> bool {
        self.lock().blocks.contains_key(&address)
    }

    fn get_or_load<'s>(
        &self,
        state: &'s mut StoreState,
        address: u64,
    ) -> Result<&'s mut GlobalHeapCollection, FormatError> {
        if !state.blocks.contains_key(&address) {
            let loaded = match &self.loader {
                Some(load) => load(address)?,
                None => None,
            };
            let block = loaded.ok_or(FormatError::HeapBlockNotFound(address))?;
            log::debug!("loaded global heap collection @{address:#x} ({} objects)", block.len());
            state.blocks.insert(address, block);
        }
        state
            .blocks
            .get_mut(&address)
            .ok_or(FormatError::HeapBlockNotFound(address))
    }

    /// Payload of object `id` in the collection at `address`.
    pub fn resolve(&self, address: u64, id: u64) -> Result<Vec<u8>, FormatError> {
        check_object_id(id)?;
        let mut state = self.lock();
        let block = self.get_or_load(&mut state, address)?;
        block.resolve(id).map(<[u8]>::to_vec)
    }

    /// Store `payload` in the current block, opening a new block when it is
    /// full or out of ids.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u16), FormatError> {
        let mut state = self.lock();
        if let Some(address) = state.current {
            if let Some(block) = state.blocks.get_mut(&address) {
                if block.ids_available() && block.object_footprint(payload.len()) <= block.free_space() {
                    let id = block.append(payload)?;
                    mark_dirty(&mut state, address);
                    return Ok((address, id));
                }
            }
        }

        let header = GlobalHeapCollection::header_size(self.props.length_size) as u64;
        let needed = header
            + GlobalHeapCollection::object_header_size(self.props.length_size) as u64
            + crate::bytes::pad8(payload.len()) as u64;
        let capacity = self.props.block_capacity.max(needed);
        let address = match &self.allocator {
            Some(alloc) => alloc(capacity)?,
            None => {
                let a = state.next_synthetic;
                state.next_synthetic += capacity;
                a
            }
        };
        log::debug!("new global heap collection @{address:#x}, {capacity} bytes");
        let mut block = GlobalHeapCollection::new(address, capacity, self.props.length_size)?;
        let id = block.append(payload)?;
        state.blocks.insert(address, block);
        state.current = Some(address);
        mark_dirty(&mut state, address);
        Ok((address, id))
    }

    pub fn increment_ref(&self, address: u64, id: u16) -> Result<u16, FormatError> {
        let mut state = self.lock();
        let count = self.get_or_load(&mut state, address)?.increment_ref(id)?;
        mark_dirty(&mut state, address);
        Ok(count)
    }

    pub fn decrement_ref(&self, address: u64, id: u16) -> Result<u16, FormatError> {
        let mut state = self.lock();
        let count = self.get_or_load(&mut state, address)?.decrement_ref(id)?;
        mark_dirty(&mut state, address);
        Ok(count)
    }

    /// Snapshot of a cached collection.
    pub fn block(&self, address: u64) -> Option<GlobalHeapCollection> {
        self.lock().blocks.get(&address).cloned()
    }

    /// Serialized images of every block modified since the last call,
    /// as `(address, bytes)` pairs in modification order.
    pub fn take_dirty(&self) -> Vec<(u64, Vec<u8>)> {
        let mut state = self.lock();
        let dirty = std::mem::take(&mut state.dirty);
        dirty
            .into_iter()
            .filter_map(|a| state.blocks.get(&a).map(|b| (a, b.serialize())))
            .collect()
    }
}

fn mark_dirty(state: &mut StoreState, address: u64) {
    if !state.dirty.contains(&address) {
        state.dirty.push(address);
    }
}

impl HeapSource for GlobalHeapStore {
    fn resolve(&self, address: u64, id: u32) -> Result<Vec<u8>, FormatError> {
        GlobalHeapStore::resolve(self, address, id as u64)
    }
}

impl HeapSink for GlobalHeapStore {
    fn append(&self, payload: &[u8]) -> Result<(u64, u32), FormatError> {
        GlobalHeapStore::append(self, payload).map(|(a, id)| (a, id as u32))
    }
}

impl std::fmt::Debug for GlobalHeapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("GlobalHeapStore")
            .field("props", &self.props)
            .field("blocks", &state.blocks.len())
            .field("current", &state.current)
            .finish()
    }
}
