//! Chunked dataset reading through the B-tree v1 chunk index.
//!
//! A [`ChunkedReader`] resolves chunks by origin, strips their filters with
//! a [`ChunkPipeline`] (honouring each chunk's filter mask) and assembles
//! them into the dataset's row-major byte image or decoded values.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::btree_v1::{collect_chunks, find_chunk, ChunkRecord};
use crate::codec::Codec;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::ChunkPipeline;
use crate::property_list::FilterProps;
use crate::value::Value;

/// Shape and index location of a chunked dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedLayout {
    /// Address of the root of the chunk B-tree.
    pub btree_address: u64,
    /// Current dataset extent, one entry per dimension.
    pub dataset_dims: Vec<u64>,
    /// Chunk extent in elements, same rank as the dataset.
    pub chunk_dims: Vec<u64>,
}

impl ChunkedLayout {
    pub fn rank(&self) -> usize {
        self.dataset_dims.len()
    }

    pub fn chunk_elements(&self) -> usize {
        self.chunk_dims.iter().product::<u64>() as usize
    }

    pub fn dataset_elements(&self) -> usize {
        self.dataset_dims.iter().product::<u64>() as usize
    }
}

/// Reads chunks of one dataset out of a file image.
#[derive(Debug)]
pub struct ChunkedReader<'a> {
    file: &'a [u8],
    layout: ChunkedLayout,
    datatype: Datatype,
    pipeline: ChunkPipeline,
    offset_size: u8,
    fill_value: Option<Vec<u8>>,
}

impl<'a> ChunkedReader<'a> {
    pub fn new(
        file: &'a [u8],
        layout: ChunkedLayout,
        datatype: Datatype,
        filters: &FilterPipeline,
        props: &FilterProps,
        offset_size: u8,
    ) -> Result<Self, FormatError> {
        if layout.chunk_dims.len() != layout.rank() {
            return Err(FormatError::ElementCountMismatch {
                expected: layout.rank(),
                actual: layout.chunk_dims.len(),
            });
        }
        if layout.chunk_dims.iter().any(|&d| d == 0) {
            return Err(FormatError::ValueOutOfRange);
        }
        let elem = datatype.type_size() as u64;
        let fits = |dims: &[u64]| {
            dims.iter()
                .try_fold(elem, |n, &d| n.checked_mul(d))
                .is_some_and(|n| usize::try_from(n).is_ok())
        };
        if !fits(&layout.chunk_dims) || !fits(&layout.dataset_dims) {
            return Err(FormatError::ValueOutOfRange);
        }
        let pipeline = ChunkPipeline::new(filters, datatype.type_size(), props)?;
        Ok(Self {
            file,
            layout,
            datatype,
            pipeline,
            offset_size,
            fill_value: None,
        })
    }

    /// Element bytes used where no chunk is stored (default: zeros).
    pub fn with_fill_value(mut self, fill: Vec<u8>) -> Result<Self, FormatError> {
        let size = self.element_size();
        if fill.len() != size {
            return Err(FormatError::SizeMismatch {
                expected: size,
                actual: fill.len(),
            });
        }
        self.fill_value = Some(fill);
        Ok(self)
    }

    pub fn layout(&self) -> &ChunkedLayout {
        &self.layout
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    fn element_size(&self) -> usize {
        self.datatype.type_size() as usize
    }

    fn chunk_bytes(&self) -> usize {
        self.layout.chunk_elements() * self.element_size()
    }

    /// Every stored chunk in index order.
    pub fn chunks(&self) -> Result<Vec<ChunkRecord>, FormatError> {
        collect_chunks(
            self.file,
            self.layout.btree_address,
            self.offset_size,
            self.layout.rank(),
        )
    }

    /// The chunk whose origin is `origin`, if stored.
    pub fn locate(&self, origin: &[u64]) -> Result<Option<ChunkRecord>, FormatError> {
        if origin.len() != self.layout.rank() {
            return Err(FormatError::ElementCountMismatch {
                expected: self.layout.rank(),
                actual: origin.len(),
            });
        }
        find_chunk(self.file, self.layout.btree_address, self.offset_size, origin)
    }

    /// Unfiltered bytes of a stored chunk.
    pub fn read_chunk(&self, record: &ChunkRecord) -> Result<Vec<u8>, FormatError> {
        let start = record.address as usize;
        let end = start.saturating_add(record.size as usize);
        let raw = self.file.get(start..end).ok_or(FormatError::UnexpectedEof {
            expected: end,
            available: self.file.len(),
        })?;
        let data = self.pipeline.reverse(raw, record.filter_mask)?;
        log::trace!(
            "chunk {:?}: {} stored bytes -> {}",
            record.offsets,
            raw.len(),
            data.len()
        );
        if data.len() != self.chunk_bytes() {
            return Err(FormatError::SizeMismatch {
                expected: self.chunk_bytes(),
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Unfiltered bytes of the chunk at `origin`; `None` if never written.
    pub fn chunk_at(&self, origin: &[u64]) -> Result<Option<Vec<u8>>, FormatError> {
        self.locate(origin)?
            .map(|record| self.read_chunk(&record))
            .transpose()
    }

    /// Decoded elements of the chunk at `origin`.
    pub fn decode_chunk(
        &self,
        codec: &Codec<'_>,
        origin: &[u64],
    ) -> Result<Option<Vec<Value>>, FormatError> {
        self.chunk_at(origin)?
            .map(|bytes| codec.decode_all(&self.datatype, &bytes))
            .transpose()
    }

    /// The whole dataset in row-major order. Chunk parts outside the
    /// dataset extent are dropped; unstored chunks read as the fill value.
    pub fn read_all(&self) -> Result<Vec<u8>, FormatError> {
        let elem = self.element_size();
        let total = self.layout.dataset_elements();
        let mut output = match &self.fill_value {
            Some(fill) => fill.repeat(total),
            None => vec![0u8; total * elem],
        };
        let chunks = self.chunks()?;
        log::debug!("assembling {} chunks into {total} elements", chunks.len());
        for record in &chunks {
            let data = self.read_chunk(record)?;
            self.scatter(&data, &record.offsets, &mut output);
        }
        Ok(output)
    }

    /// The whole dataset decoded element by element.
    pub fn read_values(&self, codec: &Codec<'_>) -> Result<Vec<Value>, FormatError> {
        codec.decode_all(&self.datatype, &self.read_all()?)
    }

    /// Copy a chunk into the dataset image, clipping at the dataset edge.
    fn scatter(&self, chunk: &[u8], origin: &[u64], output: &mut [u8]) {
        let elem = self.element_size();
        let rank = self.layout.rank();
        let ds = &self.layout.dataset_dims;
        let cd = &self.layout.chunk_dims;
        if rank == 0 {
            let n = chunk.len().min(output.len());
            output[..n].copy_from_slice(&chunk[..n]);
            return;
        }

        let mut ds_strides = vec![1u64; rank];
        let mut chunk_strides = vec![1u64; rank];
        for d in (0..rank - 1).rev() {
            ds_strides[d] = ds_strides[d + 1] * ds[d + 1];
            chunk_strides[d] = chunk_strides[d + 1] * cd[d + 1];
        }

        // whole rows along the last dimension are contiguous in both images
        let row = cd[rank - 1].min(ds[rank - 1].saturating_sub(origin[rank - 1])) as usize;
        if row == 0 {
            return;
        }
        let rows = self.layout.chunk_elements() / cd[rank - 1] as usize;
        'rows: for r in 0..rows {
            let mut rem = r as u64 * cd[rank - 1];
            let mut dst = 0u64;
            for d in 0..rank {
                let local = rem / chunk_strides[d];
                rem %= chunk_strides[d];
                let global = match origin[d].checked_add(local) {
                    Some(g) if g < ds[d] => g,
                    _ => continue 'rows,
                };
                dst = match global.checked_mul(ds_strides[d]).and_then(|o| dst.checked_add(o)) {
                    Some(o) => o,
                    None => continue 'rows,
                };
            }
            let src = r * cd[rank - 1] as usize * elem;
            let dst = dst as usize * elem;
            let len = row * elem;
            if let (Some(from), Some(to)) = (chunk.get(src..src + len), output.get_mut(dst..dst + len)) {
                to.copy_from_slice(from);
            }
        }
    }
}
