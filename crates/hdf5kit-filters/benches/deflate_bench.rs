//! Deflate backend throughput: active backend against miniz_oxide.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i as f64 * 0.01).sin() * 127.0 + 128.0) as u8).collect()
}

fn bench_compress(c: &mut Criterion) {
    let data = generate_test_data(1_000_000);

    c.bench_function("deflate_compress", |b| {
        b.iter(|| hdf5kit_filters::deflate_compress(black_box(&data), 6).unwrap())
    });

    c.bench_function("deflate_compress_miniz", |b| {
        b.iter(|| hdf5kit_filters::deflate_compress_miniz(black_box(&data), 6).unwrap())
    });
}

fn bench_decompress(c: &mut Criterion) {
    let data = generate_test_data(1_000_000);
    let compressed = hdf5kit_filters::deflate_compress_miniz(&data, 6).unwrap();

    c.bench_function("deflate_decompress", |b| {
        b.iter(|| {
            hdf5kit_filters::deflate_decompress(black_box(&compressed), data.len()).unwrap()
        })
    });

    c.bench_function("deflate_decompress_miniz", |b| {
        b.iter(|| hdf5kit_filters::deflate_decompress_miniz(black_box(&compressed)).unwrap())
    });
}

fn bench_raw_fallback(c: &mut Criterion) {
    let data = generate_test_data(1_000_000);
    let compressed = hdf5kit_filters::deflate_compress_miniz(&data, 6).unwrap();
    // strip the zlib wrapper to exercise the raw-inflate path
    let raw = compressed[2..compressed.len() - 4].to_vec();

    c.bench_function("raw_inflate", |b| {
        b.iter(|| hdf5kit_filters::raw_inflate(black_box(&raw), data.len()).unwrap())
    });
}

criterion_group!(benches, bench_compress, bench_decompress, bench_raw_fallback);
criterion_main!(benches);
