#![no_main]
use hdf5kit_format::btree_v1::{collect_chunks, collect_symbol_table_nodes};
use hdf5kit_format::btree_v2::BTreeV2;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(tree) = BTreeV2::open(data, 0, 8, 8) {
        let _ = tree.records(data);
    }
    let _ = collect_symbol_table_nodes(data, 0, 8, 8);
    let _ = collect_chunks(data, 0, 8, 2);
});
