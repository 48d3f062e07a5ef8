#![no_main]
use hdf5kit_format::global_heap::GlobalHeapCollection;
use hdf5kit_format::local_heap::LocalHeap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for &length_size in &[4u8, 8] {
        if let Ok(collection) = GlobalHeapCollection::parse(data, 0, length_size) {
            for object in collection.objects() {
                let _ = collection.resolve(object.index as u64);
            }
        }
        if let Ok(heap) = LocalHeap::parse(data, 0, 8, length_size) {
            let _ = heap.free_blocks(data, length_size);
        }
    }
});
