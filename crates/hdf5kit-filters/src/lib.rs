//! Deflate backends for the hdf5kit chunk filter pipeline.
//!
//! HDF5 writes deflate-filtered chunks as zlib streams. Some producers write
//! bare deflate streams instead, so [`deflate_decompress`] falls back to raw
//! inflate when the zlib header does not check out.
//!
//! The default backend is `flate2` (miniz_oxide). The `fast-deflate` feature
//! switches to `libdeflater`.

use std::io::{Read, Write};

/// True if `data` starts with a valid zlib header (CM = 8, FCHECK ok).
pub fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0F == 8 && cmf >> 4 <= 7 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

/// Decompress a deflate chunk payload.
///
/// `size_hint` is the expected decompressed size (the chunk's byte size);
/// output may be larger than the hint.
pub fn deflate_decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>, String> {
    if !has_zlib_header(data) {
        log::warn!("deflate payload of {} bytes has no zlib header; inflating raw", data.len());
        return raw_inflate(data, size_hint);
    }
    #[cfg(feature = "fast-deflate")]
    {
        fast_deflate_decompress(data, size_hint)
    }
    #[cfg(not(feature = "fast-deflate"))]
    {
        default_deflate_decompress(data, size_hint)
    }
}

/// Compress data as a zlib stream.
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    #[cfg(feature = "fast-deflate")]
    {
        fast_deflate_compress(data, level)
    }
    #[cfg(not(feature = "fast-deflate"))]
    {
        default_deflate_compress(data, level)
    }
}

/// Inflate a bare deflate stream (no zlib wrapper).
pub fn raw_inflate(data: &[u8], size_hint: usize) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    let mut result = Vec::with_capacity(size_hint);
    decoder
        .read_to_end(&mut result)
        .map_err(|e| format!("raw inflate failed: {e}"))?;
    Ok(result)
}

// ---------------------------------------------------------------------------
// Default backend: flate2 (miniz_oxide)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "fast-deflate"))]
fn default_deflate_decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::with_capacity(size_hint);
    decoder
        .read_to_end(&mut result)
        .map_err(|e| e.to_string())?;
    Ok(result)
}

#[cfg(not(feature = "fast-deflate"))]
fn default_deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    deflate_compress_miniz(data, level)
}

// ---------------------------------------------------------------------------
// Fast backend: libdeflater
// ---------------------------------------------------------------------------

#[cfg(feature = "fast-deflate")]
fn fast_deflate_decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>, String> {
    let mut decompressor = libdeflater::Decompressor::new();
    // libdeflater needs the whole output buffer up front; grow on a short guess
    let mut capacity = size_hint.max(data.len() * 4).max(64);
    loop {
        let mut output = vec![0u8; capacity];
        match decompressor.zlib_decompress(data, &mut output) {
            Ok(actual_size) => {
                output.truncate(actual_size);
                return Ok(output);
            }
            Err(libdeflater::DecompressionError::InsufficientSpace) if capacity < 1 << 31 => {
                capacity *= 2;
            }
            Err(e) => return Err(format!("libdeflater decompress error: {e:?}")),
        }
    }
}

#[cfg(feature = "fast-deflate")]
fn fast_deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let level = libdeflater::CompressionLvl::new(level.clamp(1, 12) as i32)
        .map_err(|e| format!("libdeflater level error: {e:?}"))?;
    let mut compressor = libdeflater::Compressor::new(level);
    let max_size = compressor.zlib_compress_bound(data.len());
    let mut output = vec![0u8; max_size];
    let actual_size = compressor
        .zlib_compress(data, &mut output)
        .map_err(|e| format!("libdeflater compress error: {e:?}"))?;
    output.truncate(actual_size);
    Ok(output)
}

/// Decompress zlib data using the default (miniz_oxide) backend.
/// Available regardless of feature flags for comparison/testing.
pub fn deflate_decompress_miniz(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| e.to_string())?;
    Ok(result)
}

/// Compress data using the default (miniz_oxide) backend.
/// Available regardless of feature flags for comparison/testing.
pub fn deflate_compress_miniz(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(data).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_roundtrip() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let compressed = deflate_compress(&data, 6).unwrap();
        assert!(has_zlib_header(&compressed));
        let decompressed = deflate_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn decompress_python_zlib() {
        // python3 -c "import zlib; print(list(zlib.compress(bytes(range(10)), 6)))"
        let compressed: Vec<u8> = vec![
            120, 156, 99, 96, 100, 98, 102, 97, 101, 99, 231, 224, 4, 0, 0, 175, 0, 46,
        ];
        let decompressed = deflate_decompress(&compressed, 10).unwrap();
        assert_eq!(decompressed, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn raw_stream_fallback() {
        // the same payload with the 2-byte zlib header and adler32 trailer removed
        let raw: Vec<u8> = vec![99, 96, 100, 98, 102, 97, 101, 99, 231, 224, 4, 0];
        assert!(!has_zlib_header(&raw));
        let decompressed = deflate_decompress(&raw, 10).unwrap();
        assert_eq!(decompressed, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn cross_backend_compatibility() {
        // Compress with miniz, decompress with current backend
        let data: Vec<u8> = (0..500).map(|i| (i * 7 % 256) as u8).collect();
        let compressed = deflate_compress_miniz(&data, 6).unwrap();
        let decompressed = deflate_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
        assert_eq!(deflate_decompress_miniz(&compressed).unwrap(), data);
    }

    #[test]
    fn empty_data() {
        let compressed = deflate_compress(&[], 6).unwrap();
        let decompressed = deflate_decompress(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn output_larger_than_hint() {
        let data = vec![7u8; 50_000];
        let compressed = deflate_compress(&data, 9).unwrap();
        assert_eq!(deflate_decompress(&compressed, 16).unwrap(), data);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(deflate_decompress(&[0x78, 0x9C, 0xFF, 0xFF, 0xFF], 8).is_err());
    }
}
