#![no_main]
use hdf5kit_format::filter_pipeline::FilterPipeline;
use hdf5kit_format::filters::ChunkPipeline;
use hdf5kit_format::property_list::FilterProps;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(description) = FilterPipeline::parse(data) else {
        return;
    };
    let Ok(pipeline) = ChunkPipeline::new(&description, 4, &FilterProps::default()) else {
        return;
    };
    // the message bytes double as a stored chunk
    let _ = pipeline.reverse(data, 0);
});
