use std::sync::Arc;

use hdf5kit_format::btree_v1::{iterate_group, lookup_group_entry, ChunkRecord};
use hdf5kit_format::btree_v1_writer::{ChunkTreeBuilder, GroupTreeBuilder};
use hdf5kit_format::btree_v2::{
    name_hash, BTreeV2, BTreeV2Record, BTreeV2Writer, TYPE_LINK_CREATION_ORDER, TYPE_LINK_NAME,
};
use hdf5kit_format::chunked_read::{ChunkedLayout, ChunkedReader};
use hdf5kit_format::filter_pipeline::{FilterDescription, FilterPipeline};
use hdf5kit_format::filters::ChunkPipeline;
use hdf5kit_format::heap_store::GlobalHeapStore;
use hdf5kit_format::local_heap::LocalHeap;
use hdf5kit_format::property_list::{BTreeProps, FilterProps, HeapProps};
use hdf5kit_format::symbol_table::SymbolTableMessage;
use hdf5kit_format::type_builders::{
    make_f64_type, make_i32_type, make_vl_sequence_type, make_vl_string_type, CompoundTypeBuilder,
};
use hdf5kit_format::{Codec, Datatype, FormatError, Value};

/// Bump allocator handing out addresses from `start`.
fn bump(start: u64) -> impl FnMut(u64) -> u64 {
    let mut next = start;
    move |size| {
        let a = next;
        next += size;
        a
    }
}

/// Write `(address, bytes)` blocks into one file image.
fn materialize(file: &mut Vec<u8>, blocks: &[(u64, Vec<u8>)]) {
    for (address, bytes) in blocks {
        let at = *address as usize;
        if file.len() < at + bytes.len() {
            file.resize(at + bytes.len(), 0);
        }
        file[at..at + bytes.len()].copy_from_slice(bytes);
    }
}

#[test]
fn vl_sequence_written_to_fresh_heap_and_read_back() {
    let store = GlobalHeapStore::new(HeapProps::default());
    let codec = Codec::default().with_global_heap(&store);
    let dt = make_vl_sequence_type(make_i32_type(), 8);

    let value = Value::Sequence(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
    let descriptor = codec.encode(&dt, &value).unwrap();
    assert_eq!(descriptor.len(), 16);
    assert_eq!(u32::from_le_bytes(descriptor[0..4].try_into().unwrap()), 3);
    assert_eq!(codec.decode(&dt, &descriptor).unwrap(), value);

    // flush the heap into a file image and read through a fresh store
    let mut file = Vec::new();
    materialize(&mut file, &store.take_dirty());
    let reopened = GlobalHeapStore::over_image(Arc::from(file), HeapProps::default());
    let codec = Codec::default().with_heap(&reopened);
    assert_eq!(codec.decode(&dt, &descriptor).unwrap(), value);
}

#[test]
fn vl_strings_share_a_block() {
    let store = GlobalHeapStore::new(HeapProps::default());
    let codec = Codec::default().with_global_heap(&store);
    let dt = make_vl_string_type(8);
    let names = ["alpha", "", "gamma ray"];
    let encoded: Vec<Vec<u8>> = names
        .iter()
        .map(|n| codec.encode(&dt, &Value::String(n.to_string())).unwrap())
        .collect();
    for (bytes, name) in encoded.iter().zip(names) {
        assert_eq!(codec.decode(&dt, bytes).unwrap(), Value::String(name.to_string()));
    }
    // the empty string never touches the heap
    assert_eq!(&encoded[1][..], &[0u8; 16][..]);
    assert_eq!(encoded[0][4..12], encoded[2][4..12]);
}

#[test]
fn store_rolls_over_when_a_block_runs_out_of_ids() {
    let store = GlobalHeapStore::new(HeapProps::new().block_capacity(2 * 1024 * 1024));
    let (first_block, first_id) = store.append(b"").unwrap();
    assert_eq!(first_id, 1);
    let mut last = (first_block, first_id);
    for _ in 1..65535 {
        last = store.append(b"").unwrap();
    }
    assert_eq!(last, (first_block, 65535));
    assert!(!store.block(first_block).unwrap().ids_available());

    let (next_block, id) = store.append(b"spill").unwrap();
    assert_ne!(next_block, first_block);
    assert_eq!(id, 1);
    assert_eq!(store.resolve(next_block, 1).unwrap(), b"spill");
    assert_eq!(
        store.resolve(first_block, 65536),
        Err(FormatError::HeapObjectIdOutOfRange(65536))
    );
}

#[test]
fn symbol_table_group_round_trip() {
    let mut builder = GroupTreeBuilder::new(&BTreeProps::new().group_leaf_k(2), &HeapProps::default());
    let names: Vec<String> = (0..25).map(|i| format!("dataset_{i:02}")).collect();
    for (i, name) in names.iter().enumerate().rev() {
        builder.insert(name, 0x8000 + i as u64 * 0x100).unwrap();
    }
    let image = builder.finish(bump(96)).unwrap();
    let mut file = vec![0u8; 96];
    materialize(&mut file, &image.blocks);

    // the symbol table message survives its own wire format
    let stab = SymbolTableMessage::parse(&image.symbol_table.serialize(8), 8).unwrap();
    assert_eq!(stab, image.symbol_table);

    let heap = LocalHeap::parse(&file, stab.local_heap_address as usize, 8, 8).unwrap();
    let entry = lookup_group_entry(&file, stab.btree_address, &heap, "dataset_17", 8, 8)
        .unwrap()
        .unwrap();
    assert_eq!(entry.object_header_address, 0x8000 + 17 * 0x100);

    let listed: Vec<String> = iterate_group(&file, stab.btree_address, &heap, 8, 8)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(listed, names);
}

#[test]
fn link_name_index_lookup() {
    let names: Vec<String> = (0..120).map(|i| format!("link-{i}")).collect();
    let records: Vec<BTreeV2Record> = names
        .iter()
        .enumerate()
        .map(|(i, name)| BTreeV2Record::LinkName {
            hash: name_hash(name),
            heap_id: [0, i as u8, (i >> 8) as u8, 0, 0, 0, 0],
        })
        .collect();
    let image = BTreeV2Writer::new(TYPE_LINK_NAME, 256, 11)
        .build(records, bump(0))
        .unwrap();
    let mut file = Vec::new();
    materialize(&mut file, &image.blocks);

    let tree = BTreeV2::open(&file, image.header_address as usize, 8, 8).unwrap();
    assert_eq!(tree.header.total_records, 120);
    assert!(tree.header.depth >= 1);

    let hit = tree.find_by_hash(&file, name_hash("link-77")).unwrap();
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].heap_id(), Some(&[0u8, 77, 0, 0, 0, 0, 0][..]));
    assert!(tree.find_by_hash(&file, name_hash("link-500")).unwrap().is_empty());

    let hashes: Vec<u32> = tree
        .records(&file)
        .unwrap()
        .iter()
        .filter_map(BTreeV2Record::hash)
        .collect();
    assert!(hashes.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn creation_order_index_enumerates_in_order() {
    let records: Vec<BTreeV2Record> = (0..40u64)
        .rev()
        .map(|order| BTreeV2Record::LinkCreationOrder {
            order,
            heap_id: [1, order as u8, 0, 0, 0, 0, 0],
        })
        .collect();
    let image = BTreeV2Writer::new(TYPE_LINK_CREATION_ORDER, 128, 15)
        .build(records, bump(32))
        .unwrap();
    let mut file = vec![0u8; 32];
    materialize(&mut file, &image.blocks);
    let tree = BTreeV2::open(&file, image.header_address as usize, 8, 8).unwrap();
    let orders: Vec<u64> = tree
        .records(&file)
        .unwrap()
        .into_iter()
        .map(|r| match r {
            BTreeV2Record::LinkCreationOrder { order, .. } => order,
            other => panic!("expected creation-order record, got {other:?}"),
        })
        .collect();
    assert_eq!(orders, (0..40).collect::<Vec<_>>());
}

fn sample_compound() -> Datatype {
    CompoundTypeBuilder::new()
        .i32_field("step")
        .f64_field("energy")
        .build()
        .unwrap()
}

#[test]
#[cfg(feature = "deflate")]
fn chunked_compound_dataset_through_full_pipeline() {
    let dt = sample_compound();
    let codec = Codec::default();
    let filters = FilterPipeline::new(vec![
        FilterDescription::shuffle(dt.type_size()),
        FilterDescription::deflate(6),
        FilterDescription::fletcher32(),
    ]);
    let pipeline = ChunkPipeline::new(&filters, dt.type_size(), &FilterProps::default()).unwrap();

    // 50 records in chunks of 16; the last chunk is partly beyond the extent
    let record = |i: u64| {
        Value::Compound(vec![
            ("step".into(), Value::Int(i as i64)),
            ("energy".into(), Value::Float(i as f64 * 0.5)),
        ])
    };
    let mut file = vec![0u8; 128];
    let mut tree = ChunkTreeBuilder::new(&[16], &BTreeProps::default());
    for origin in (0..50u64).step_by(16) {
        let values: Vec<Value> = (origin..origin + 16).map(record).collect();
        let raw = codec.encode_all(&dt, &values).unwrap();
        let (stored, mask) = pipeline.apply(&raw).unwrap();
        let address = file.len() as u64;
        file.extend_from_slice(&stored);
        tree.insert(ChunkRecord {
            offsets: vec![origin],
            size: stored.len() as u32,
            filter_mask: mask,
            address,
        })
        .unwrap();
    }
    let index = tree.finish(bump(file.len() as u64)).unwrap();
    materialize(&mut file, &index.nodes);

    let layout = ChunkedLayout {
        btree_address: index.root_address,
        dataset_dims: vec![50],
        chunk_dims: vec![16],
    };
    let reader = ChunkedReader::new(&file, layout, dt, &filters, &FilterProps::default(), 8).unwrap();
    let values = reader.read_values(&codec).unwrap();
    assert_eq!(values.len(), 50);
    for (i, v) in values.iter().enumerate() {
        assert_eq!(v, &record(i as u64));
    }
}

#[test]
fn chunk_read_fails_on_corruption_but_siblings_survive() {
    let filters = FilterPipeline::new(vec![FilterDescription::fletcher32()]);
    let pipeline = ChunkPipeline::new(&filters, 8, &FilterProps::default()).unwrap();
    let mut file = vec![0u8; 16];
    let mut tree = ChunkTreeBuilder::new(&[4], &BTreeProps::default());
    for origin in [0u64, 4] {
        let raw: Vec<u8> = (origin..origin + 4)
            .flat_map(|v| (v as f64).to_le_bytes())
            .collect();
        let (stored, _) = pipeline.apply(&raw).unwrap();
        let address = file.len() as u64;
        file.extend_from_slice(&stored);
        tree.insert(ChunkRecord {
            offsets: vec![origin],
            size: stored.len() as u32,
            filter_mask: 0,
            address,
        })
        .unwrap();
    }
    let index = tree.finish(bump(file.len() as u64)).unwrap();
    materialize(&mut file, &index.nodes);
    file[16] ^= 0xFF;

    let layout = ChunkedLayout {
        btree_address: index.root_address,
        dataset_dims: vec![8],
        chunk_dims: vec![4],
    };
    let reader =
        ChunkedReader::new(&file, layout, make_f64_type(), &filters, &FilterProps::default(), 8)
            .unwrap();
    let err = reader.read_all().unwrap_err();
    assert_eq!(err.kind(), hdf5kit_format::ErrorKind::CorruptChunk);
    let second = reader.decode_chunk(&Codec::default(), &[4]).unwrap().unwrap();
    assert_eq!(second[3], Value::Float(7.0));
}

#[test]
fn datatype_message_round_trip_feeds_codec() {
    let dt = sample_compound();
    let wire = dt.serialize();
    let (parsed, consumed) = Datatype::parse(&wire).unwrap();
    assert_eq!(consumed, wire.len());
    assert_eq!(parsed, dt);

    let codec = Codec::default();
    let record = Value::Compound(vec![
        ("step".into(), Value::Int(-3)),
        ("energy".into(), Value::Float(1e-9)),
    ]);
    let bytes = codec.encode(&parsed, &record).unwrap();
    assert_eq!(codec.decode(&dt, &bytes).unwrap(), record);
}
