use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hdf5kit_format::btree_v1::{lookup_group_entry, ChunkRecord};
use hdf5kit_format::btree_v1_writer::{ChunkTreeBuilder, GroupTreeBuilder};
use hdf5kit_format::btree_v2::{name_hash, BTreeV2, BTreeV2Record, BTreeV2Writer, TYPE_LINK_NAME};
use hdf5kit_format::chunked_read::{ChunkedLayout, ChunkedReader};
use hdf5kit_format::filter_pipeline::{FilterDescription, FilterPipeline};
use hdf5kit_format::filters::ChunkPipeline;
use hdf5kit_format::heap_store::GlobalHeapStore;
use hdf5kit_format::local_heap::LocalHeap;
use hdf5kit_format::property_list::{BTreeProps, FilterProps, HeapProps};
use hdf5kit_format::type_builders::*;
use hdf5kit_format::{Codec, Value};

const N: usize = 100_000;

fn bump(start: u64) -> impl FnMut(u64) -> u64 {
    let mut next = start;
    move |size| {
        let a = next;
        next += size;
        a
    }
}

fn place(file: &mut Vec<u8>, blocks: &[(u64, Vec<u8>)]) {
    for (address, bytes) in blocks {
        let at = *address as usize;
        if file.len() < at + bytes.len() {
            file.resize(at + bytes.len(), 0);
        }
        file[at..at + bytes.len()].copy_from_slice(bytes);
    }
}

fn bench_decode(c: &mut Criterion) {
    let codec = Codec::default();

    let f64_dt = make_f64_type();
    let raw: Vec<u8> = (0..N).flat_map(|i| (i as f64).to_le_bytes()).collect();
    c.bench_function("decode_100k_f64", |b| {
        b.iter(|| codec.decode_all(&f64_dt, black_box(&raw)).unwrap())
    });

    let record = CompoundTypeBuilder::new()
        .i32_field("id")
        .f64_field("x")
        .f64_field("y")
        .build()
        .unwrap();
    let values: Vec<Value> = (0..N as i64)
        .map(|i| {
            Value::Compound(vec![
                ("id".into(), Value::Int(i)),
                ("x".into(), Value::Float(i as f64)),
                ("y".into(), Value::Float(-(i as f64))),
            ])
        })
        .collect();
    let packed = codec.encode_all(&record, &values).unwrap();
    c.bench_function("decode_100k_compound", |b| {
        b.iter(|| codec.decode_all(&record, black_box(&packed)).unwrap())
    });
    c.bench_function("encode_100k_compound", |b| {
        b.iter(|| codec.encode_all(&record, black_box(&values)).unwrap())
    });
}

fn bench_vl_strings(c: &mut Criterion) {
    let store = GlobalHeapStore::new(HeapProps::default());
    let codec = Codec::default().with_global_heap(&store);
    let dt = make_vl_string_type(8);
    let descriptors: Vec<u8> = (0..10_000)
        .flat_map(|i| codec.encode(&dt, &Value::String(format!("name-{i}"))).unwrap())
        .collect();
    c.bench_function("decode_10k_vl_strings", |b| {
        b.iter(|| codec.decode_all(&dt, black_box(&descriptors)).unwrap())
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let element = 8u32;
    let filters = FilterPipeline::new(vec![
        FilterDescription::shuffle(element),
        FilterDescription::deflate(6),
        FilterDescription::fletcher32(),
    ]);
    let pipeline = ChunkPipeline::new(&filters, element, &FilterProps::default()).unwrap();
    let chunk: Vec<u8> = (0..N).flat_map(|i| ((i as f64) * 0.001).sin().to_le_bytes()).collect();
    let (stored, mask) = pipeline.apply(&chunk).unwrap();

    c.bench_function("pipeline_apply_shuffle_deflate_fletcher", |b| {
        b.iter(|| pipeline.apply(black_box(&chunk)).unwrap())
    });
    c.bench_function("pipeline_reverse_shuffle_deflate_fletcher", |b| {
        b.iter(|| pipeline.reverse(black_box(&stored), mask).unwrap())
    });
}

fn bench_chunked_read(c: &mut Criterion) {
    let dt = make_i32_type();
    let filters = FilterPipeline::new(vec![FilterDescription::shuffle(4), FilterDescription::deflate(4)]);
    let pipeline = ChunkPipeline::new(&filters, 4, &FilterProps::default()).unwrap();
    let (rows, cols, chunk) = (512u64, 512u64, 64u64);

    let mut file = vec![0u8; 64];
    let mut tree = ChunkTreeBuilder::new(&[chunk, chunk], &BTreeProps::default());
    for r in (0..rows).step_by(chunk as usize) {
        for col in (0..cols).step_by(chunk as usize) {
            let raw: Vec<u8> = (0..chunk * chunk)
                .map(|i| ((r + i / chunk) * cols + col + i % chunk) as i32)
                .flat_map(i32::to_le_bytes)
                .collect();
            let (stored, filter_mask) = pipeline.apply(&raw).unwrap();
            let address = file.len() as u64;
            file.extend_from_slice(&stored);
            tree.insert(ChunkRecord {
                offsets: vec![r, col],
                size: stored.len() as u32,
                filter_mask,
                address,
            })
            .unwrap();
        }
    }
    let index = tree.finish(bump(file.len() as u64)).unwrap();
    place(&mut file, &index.nodes);

    let layout = ChunkedLayout {
        btree_address: index.root_address,
        dataset_dims: vec![rows, cols],
        chunk_dims: vec![chunk, chunk],
    };
    let reader = ChunkedReader::new(&file, layout, dt, &filters, &FilterProps::default(), 8).unwrap();
    c.bench_function("chunked_read_512x512_i32", |b| b.iter(|| reader.read_all().unwrap()));
    c.bench_function("chunk_locate", |b| {
        b.iter(|| reader.locate(black_box(&[448, 192])).unwrap())
    });
}

fn bench_group_lookup(c: &mut Criterion) {
    let mut builder = GroupTreeBuilder::new(&BTreeProps::default(), &HeapProps::default());
    for i in 0..5_000u64 {
        builder.insert(&format!("member_{i:05}"), 0x10_000 + i * 0x40).unwrap();
    }
    let image = builder.finish(bump(0)).unwrap();
    let mut file = Vec::new();
    place(&mut file, &image.blocks);
    let stab = image.symbol_table;
    let heap = LocalHeap::parse(&file, stab.local_heap_address as usize, 8, 8).unwrap();

    c.bench_function("btree_v1_group_lookup", |b| {
        b.iter(|| {
            lookup_group_entry(&file, stab.btree_address, &heap, black_box("member_03141"), 8, 8)
                .unwrap()
        })
    });

    let records: Vec<BTreeV2Record> = (0..5_000u32)
        .map(|i| BTreeV2Record::LinkName {
            hash: name_hash(&format!("member_{i:05}")),
            heap_id: [0, (i & 0xFF) as u8, (i >> 8) as u8, 0, 0, 0, 0],
        })
        .collect();
    let image = BTreeV2Writer::new(TYPE_LINK_NAME, 512, 11)
        .build(records, bump(0))
        .unwrap();
    let mut file = Vec::new();
    place(&mut file, &image.blocks);
    let tree = BTreeV2::open(&file, image.header_address as usize, 8, 8).unwrap();
    let hash = name_hash("member_03141");
    c.bench_function("btree_v2_find_by_hash", |b| {
        b.iter(|| tree.find_by_hash(&file, black_box(hash)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_vl_strings,
    bench_pipeline,
    bench_chunked_read,
    bench_group_lookup,
);
criterion_main!(benches);
