#![no_main]
use hdf5kit_format::{Codec, Datatype};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok((dt, used)) = Datatype::parse(data) else {
        return;
    };
    // whatever parses must re-encode and decode the bytes that follow it
    let _ = Datatype::parse(&dt.serialize());
    let size = dt.type_size() as usize;
    if let Some(element) = data.get(used..used.saturating_add(size)) {
        let _ = Codec::default().decode(&dt, element);
    }
});
