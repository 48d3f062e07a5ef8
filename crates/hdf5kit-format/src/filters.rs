//! Chunk filter stages and the pipeline that runs them.
//!
//! A [`ChunkPipeline`] is built from a [`FilterPipeline`] message. `apply`
//! runs the stages in write order and reports which optional stages failed
//! through the chunk filter mask; `reverse` undoes them last-to-first and
//! skips every stage whose mask bit is set.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, format, vec, vec::Vec};

use core::fmt;

use crate::error::FormatError;
use crate::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_NBIT,
    FILTER_SCALEOFFSET, FILTER_SHUFFLE,
};
use crate::nbit::NBitParams;
use crate::property_list::FilterProps;
use crate::scale_offset::ScaleOffsetParams;

/// Filter masks are 32 bits wide, one bit per pipeline position.
pub const MAX_FILTERS: usize = 32;

/// One reversible chunk transform.
pub trait ChunkFilter: fmt::Debug + Send + Sync {
    /// Filter identification value as stored in the pipeline message.
    fn id(&self) -> u16;

    /// Write direction.
    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError>;

    /// Read direction.
    fn reverse(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError>;
}

/// Deflate (id 1), zlib-wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deflate {
    pub level: u32,
}

#[cfg(feature = "deflate")]
impl ChunkFilter for Deflate {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        hdf5kit_filters::deflate_compress(&data, self.level).map_err(FormatError::CompressionError)
    }

    fn reverse(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        hdf5kit_filters::deflate_decompress(&data, data.len().saturating_mul(4))
            .map_err(FormatError::DecompressionError)
    }
}

#[cfg(not(feature = "deflate"))]
impl ChunkFilter for Deflate {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn apply(&self, _data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::UnsupportedFilter(FILTER_DEFLATE))
    }

    fn reverse(&self, _data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::UnsupportedFilter(FILTER_DEFLATE))
    }
}

/// Byte shuffle (id 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shuffle {
    pub element_size: usize,
}

impl ChunkFilter for Shuffle {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        shuffle(data, self.element_size)
    }

    fn reverse(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        unshuffle(data, self.element_size)
    }
}

/// Group byte `j` of every element together, for each `j`.
///
/// A trailing partial element is left in place.
pub fn shuffle(data: Vec<u8>, element_size: usize) -> Result<Vec<u8>, FormatError> {
    if element_size <= 1 || data.len() < element_size {
        return Ok(data);
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(element_size).enumerate() {
        for (j, &b) in element.iter().enumerate() {
            out[j * n + i] = b;
        }
    }
    let tail = n * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    Ok(out)
}

/// Inverse of [`shuffle`]: rebuild element-major order from byte planes.
pub fn unshuffle(data: Vec<u8>, element_size: usize) -> Result<Vec<u8>, FormatError> {
    if element_size <= 1 || data.len() < element_size {
        return Ok(data);
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in out.chunks_exact_mut(element_size).enumerate() {
        for (j, b) in element.iter_mut().enumerate() {
            *b = data[j * n + i];
        }
    }
    let tail = n * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    Ok(out)
}

/// Fletcher-32 checksum trailer (id 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fletcher32;

impl ChunkFilter for Fletcher32 {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn apply(&self, mut data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        let sum = fletcher32(&data);
        data.extend_from_slice(&sum.to_le_bytes());
        Ok(data)
    }

    fn reverse(&self, mut data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        let Some(split) = data.len().checked_sub(4) else {
            return Err(FormatError::FilterError(
                "fletcher32: data too short for checksum".into(),
            ));
        };
        let mut trailer = [0u8; 4];
        trailer.copy_from_slice(&data[split..]);
        let stored = u32::from_le_bytes(trailer);
        data.truncate(split);
        let computed = fletcher32(&data);
        if stored == computed {
            return Ok(data);
        }
        // files written before HDF5 1.6.3 swap the bytes of each 16-bit sum
        let swapped = (computed & 0x00FF_00FF) << 8 | (computed >> 8) & 0x00FF_00FF;
        if stored == swapped {
            log::debug!("fletcher32: accepted byte-swapped legacy checksum");
            return Ok(data);
        }
        Err(FormatError::Fletcher32Mismatch {
            expected: stored,
            computed,
        })
    }
}

/// HDF5 Fletcher-32: big-endian 16-bit words, a trailing odd byte counts
/// as the high byte of a final word.
pub fn fletcher32(data: &[u8]) -> u32 {
    // 360 words is the longest run whose sums fit a u32 before reduction
    const BLOCK: usize = 360 * 2;

    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for block in data.chunks(BLOCK) {
        for word in block.chunks(2) {
            let value = match word {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                [hi] => (*hi as u32) << 8,
                _ => 0,
            };
            sum1 += value;
            sum2 += sum1;
        }
        sum1 %= 65535;
        sum2 %= 65535;
    }
    (sum2 << 16) | sum1
}

/// N-bit packing (id 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NBit(pub NBitParams);

impl ChunkFilter for NBit {
    fn id(&self) -> u16 {
        FILTER_NBIT
    }

    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        self.0.compress(&data)
    }

    fn reverse(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        self.0.decompress(&data)
    }
}

/// Scale-offset packing (id 6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleOffset(pub ScaleOffsetParams);

impl ChunkFilter for ScaleOffset {
    fn id(&self) -> u16 {
        FILTER_SCALEOFFSET
    }

    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        self.0.compress(&data)
    }

    fn reverse(&self, data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        self.0.decompress(&data)
    }
}

/// Placeholder for an optional filter this engine does not implement.
/// Fails if it is ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsupported(pub u16);

impl ChunkFilter for Unsupported {
    fn id(&self) -> u16 {
        self.0
    }

    fn apply(&self, _data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::UnsupportedFilter(self.0))
    }

    fn reverse(&self, _data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
        Err(FormatError::UnsupportedFilter(self.0))
    }
}

#[derive(Debug)]
struct Stage {
    filter: Box<dyn ChunkFilter>,
    optional: bool,
}

/// Runnable form of a filter pipeline message.
#[derive(Debug, Default)]
pub struct ChunkPipeline {
    stages: Vec<Stage>,
}

impl ChunkPipeline {
    /// Build stages for `pipeline`. `element_size` is the dataset element
    /// size, used by shuffle when its client data carries none.
    ///
    /// An unknown mandatory filter fails here; an unknown optional one only
    /// fails if a chunk that did not mask it is reversed.
    pub fn new(
        pipeline: &FilterPipeline,
        element_size: u32,
        props: &FilterProps,
    ) -> Result<Self, FormatError> {
        if pipeline.filters.len() > MAX_FILTERS {
            return Err(FormatError::FilterError(format!(
                "{} filters exceed the {MAX_FILTERS}-bit filter mask",
                pipeline.filters.len()
            )));
        }
        let stages = pipeline
            .filters
            .iter()
            .map(|desc| {
                Ok(Stage {
                    filter: build_stage(desc, element_size, props)?,
                    optional: desc.is_optional(),
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;
        Ok(Self { stages })
    }

    /// Pipeline from explicit stages, all mandatory.
    pub fn from_filters(filters: Vec<Box<dyn ChunkFilter>>) -> Self {
        Self {
            stages: filters
                .into_iter()
                .map(|filter| Stage {
                    filter,
                    optional: false,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Filter ids in write order.
    pub fn ids(&self) -> Vec<u16> {
        self.stages.iter().map(|s| s.filter.id()).collect()
    }

    /// Run every stage in write order. Returns the filtered bytes and the
    /// filter mask recording optional stages that failed and were skipped.
    pub fn apply(&self, data: &[u8]) -> Result<(Vec<u8>, u32), FormatError> {
        let mut data = data.to_vec();
        let mut mask = 0u32;
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.optional {
                match stage.filter.apply(data.clone()) {
                    Ok(out) => data = out,
                    Err(e) => {
                        log::warn!("optional filter {} skipped: {e}", stage.filter.id());
                        mask |= 1 << i;
                    }
                }
            } else {
                data = stage.filter.apply(data)?;
            }
        }
        Ok((data, mask))
    }

    /// Undo every stage, last first, skipping those set in `filter_mask`.
    pub fn reverse(&self, data: &[u8], filter_mask: u32) -> Result<Vec<u8>, FormatError> {
        let mut data = data.to_vec();
        for (i, stage) in self.stages.iter().enumerate().rev() {
            if filter_mask & (1 << i) != 0 {
                log::warn!(
                    "filter {} at position {i} masked out for this chunk",
                    stage.filter.id()
                );
                continue;
            }
            data = stage.filter.reverse(data)?;
        }
        log::trace!("chunk reversed through {} filters: {} bytes", self.len(), data.len());
        Ok(data)
    }
}

fn build_stage(
    desc: &FilterDescription,
    element_size: u32,
    props: &FilterProps,
) -> Result<Box<dyn ChunkFilter>, FormatError> {
    let cd = &desc.client_data;
    Ok(match desc.filter_id {
        FILTER_DEFLATE => Box::new(Deflate {
            level: cd.first().copied().unwrap_or(props.deflate_level),
        }),
        FILTER_SHUFFLE => Box::new(Shuffle {
            element_size: cd.first().copied().unwrap_or(element_size) as usize,
        }),
        FILTER_FLETCHER32 => Box::new(Fletcher32),
        FILTER_NBIT => Box::new(NBit(NBitParams::from_client_data(cd)?)),
        FILTER_SCALEOFFSET => Box::new(ScaleOffset(ScaleOffsetParams::from_client_data(cd)?)),
        other if desc.is_optional() => Box::new(Unsupported(other)),
        other => return Err(FormatError::UnsupportedFilter(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pipeline(filters: Vec<FilterDescription>) -> ChunkPipeline {
        ChunkPipeline::new(&FilterPipeline::new(filters), 8, &FilterProps::default()).unwrap()
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn deflate_round_trip() {
        let data: Vec<u8> = (0..256).map(|i| (i % 256) as u8).collect();
        let packed = Deflate { level: 6 }.apply(data.clone()).unwrap();
        assert_eq!(Deflate { level: 6 }.reverse(packed).unwrap(), data);
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn deflate_python_zlib() {
        // python3 -c "import zlib; print(list(zlib.compress(bytes(range(10)), 6)))"
        let compressed: Vec<u8> = vec![
            120, 156, 99, 96, 100, 98, 102, 97, 101, 99, 231, 224, 4, 0, 0, 175, 0, 46,
        ];
        let out = Deflate { level: 6 }.reverse(compressed).unwrap();
        assert_eq!(out, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn deflate_garbage_is_corrupt_chunk() {
        let err = Deflate { level: 6 }
            .reverse(vec![0x78, 0x9C, 0xFF, 0xFF, 0xFF])
            .unwrap_err();
        assert!(matches!(err, FormatError::DecompressionError(_)));
        assert_eq!(err.kind(), ErrorKind::CorruptChunk);
    }

    #[test]
    fn shuffle_known_pattern() {
        // [A0 A1 A2 A3 B0 B1 B2 B3] -> [A0 B0 A1 B1 A2 B2 A3 B3]
        let data = vec![0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1, 0xB2, 0xB3];
        let shuffled = shuffle(data.clone(), 4).unwrap();
        assert_eq!(shuffled, [0xA0, 0xB0, 0xA1, 0xB1, 0xA2, 0xB2, 0xA3, 0xB3]);
        assert_eq!(unshuffle(shuffled, 4).unwrap(), data);
    }

    #[test]
    fn shuffle_round_trip_with_tail() {
        let data: Vec<u8> = (0..35).collect();
        let shuffled = shuffle(data.clone(), 8).unwrap();
        assert_eq!(&shuffled[32..], &[32, 33, 34]);
        assert_eq!(unshuffle(shuffled, 8).unwrap(), data);
        assert_eq!(shuffle(data.clone(), 1).unwrap(), data);
    }

    #[test]
    fn fletcher32_known_values() {
        assert_eq!(fletcher32(&[0u8; 16]), 0);
        // words 0x0102, 0x0300 (odd tail): sum1 = 0x0402, sum2 = 0x0102 + 0x0402
        assert_eq!(fletcher32(&[1, 2, 3]), 0x0504 << 16 | 0x0402);
    }

    #[test]
    fn fletcher32_long_input_matches_reference_loop() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        let (mut s1, mut s2) = (0u64, 0u64);
        for w in data.chunks(2) {
            s1 = (s1 + ((w[0] as u64) << 8 | w[1] as u64)) % 65535;
            s2 = (s2 + s1) % 65535;
        }
        assert_eq!(fletcher32(&data), (s2 << 16 | s1) as u32);
    }

    #[test]
    fn fletcher32_verify_and_mismatch() {
        let data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let with_sum = Fletcher32.apply(data.clone()).unwrap();
        assert_eq!(with_sum.len(), 12);
        assert_eq!(Fletcher32.reverse(with_sum.clone()).unwrap(), data);

        let mut corrupt = with_sum;
        corrupt[0] ^= 0x01;
        let err = Fletcher32.reverse(corrupt).unwrap_err();
        assert!(matches!(err, FormatError::Fletcher32Mismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::CorruptChunk);
        assert!(Fletcher32.reverse(vec![1, 2]).is_err());
    }

    #[test]
    fn fletcher32_legacy_byte_order_accepted() {
        let data = vec![9u8, 8, 7, 6, 5];
        let sum = fletcher32(&data);
        let swapped = (sum & 0x00FF_00FF) << 8 | (sum >> 8) & 0x00FF_00FF;
        let mut legacy = data.clone();
        legacy.extend_from_slice(&swapped.to_le_bytes());
        assert_eq!(Fletcher32.reverse(legacy).unwrap(), data);
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn shuffle_deflate_fletcher32_pipeline() {
        let p = pipeline(vec![
            FilterDescription::shuffle(8),
            FilterDescription::deflate(9),
            FilterDescription::fletcher32(),
        ]);
        assert_eq!(p.ids(), [FILTER_SHUFFLE, FILTER_DEFLATE, FILTER_FLETCHER32]);
        let data: Vec<u8> = (0..800u32).flat_map(|i| (i as f64).to_le_bytes()).collect();
        let (packed, mask) = p.apply(&data).unwrap();
        assert_eq!(mask, 0);
        assert!(packed.len() < data.len());
        assert_eq!(p.reverse(&packed, 0).unwrap(), data);
    }

    #[test]
    fn nbit_and_scaleoffset_stages() {
        let nbit = NBitParams {
            element_count: 6,
            signed: true,
            element_size: 2,
            big_endian: false,
            precision: 9,
            offset: 0,
        };
        let p = pipeline(vec![FilterDescription::new(FILTER_NBIT, nbit.to_client_data())]);
        let data: Vec<u8> = [-256i16, 255, 0, -1, 17, -100]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let (packed, _) = p.apply(&data).unwrap();
        assert_eq!(packed.len(), (6 * 9usize).div_ceil(8));
        assert_eq!(p.reverse(&packed, 0).unwrap(), data);

        let so = ScaleOffsetParams::integer(8, true, 4);
        let p = pipeline(vec![FilterDescription::new(FILTER_SCALEOFFSET, so.to_client_data())]);
        let data: Vec<u8> = [1_000_000i64, 1_000_300, 999_990, 1_000_001]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let (packed, _) = p.apply(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(p.reverse(&packed, 0).unwrap(), data);
    }

    #[test]
    fn unknown_filters() {
        let err = ChunkPipeline::new(
            &FilterPipeline::new(vec![FilterDescription::new(32000, vec![])]),
            4,
            &FilterProps::default(),
        )
        .unwrap_err();
        assert_eq!(err, FormatError::UnsupportedFilter(32000));
        assert_eq!(err.kind(), ErrorKind::UnsupportedFilter);

        // optional unknown filter: skipped on write, masked chunk reads back
        let p = pipeline(vec![
            FilterDescription::new(32000, vec![]).optional(),
            FilterDescription::fletcher32(),
        ]);
        let data = vec![1u8, 2, 3, 4];
        let (packed, mask) = p.apply(&data).unwrap();
        assert_eq!(mask, 0b01);
        assert_eq!(p.reverse(&packed, mask).unwrap(), data);
        assert_eq!(
            p.reverse(&packed, 0).unwrap_err(),
            FormatError::UnsupportedFilter(32000)
        );
    }

    #[test]
    fn masked_filter_is_skipped() {
        let p = pipeline(vec![FilterDescription::shuffle(4), FilterDescription::fletcher32()]);
        let data: Vec<u8> = (0..16).collect();
        // chunk written without the shuffle stage
        let stages: Vec<Box<dyn ChunkFilter>> = vec![Box::new(Fletcher32)];
        let (sum_only, _) = ChunkPipeline::from_filters(stages).apply(&data).unwrap();
        assert_eq!(p.reverse(&sum_only, 0b01).unwrap(), data);
    }

    #[test]
    fn empty_pipeline_passes_through() {
        let p = ChunkPipeline::default();
        assert!(p.is_empty());
        assert_eq!(p.apply(&[1, 2, 3]).unwrap(), (vec![1, 2, 3], 0));
        assert_eq!(p.reverse(&[1, 2, 3], 0).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn shuffle_size_from_dataset_when_client_data_empty() {
        let p = ChunkPipeline::new(
            &FilterPipeline::new(vec![FilterDescription::new(FILTER_SHUFFLE, vec![])]),
            2,
            &FilterProps::default(),
        )
        .unwrap();
        let (packed, _) = p.apply(&[1, 2, 3, 4]).unwrap();
        assert_eq!(packed, [1, 3, 2, 4]);
    }
}
