use hdf5kit_derive::H5Type;
use hdf5kit_format::heap_store::GlobalHeapStore;
use hdf5kit_format::property_list::HeapProps;
use hdf5kit_format::type_builders::member_names;
use hdf5kit_format::{Codec, Datatype, FormatError, H5Type, Value};

#[derive(H5Type, Debug, Clone, PartialEq)]
struct Sample {
    id: u32,
    #[h5(name = "temp_c")]
    temperature: f64,
    valid: bool,
    window: [i16; 3],
}

#[derive(H5Type, Debug, Clone, PartialEq)]
struct Station {
    name: String,
    readings: Vec<f32>,
    latest: Sample,
}

fn sample() -> Sample {
    Sample {
        id: 7,
        temperature: 21.25,
        valid: true,
        window: [-1, 0, 1],
    }
}

#[test]
fn derived_layout_is_packed_in_declaration_order() {
    let dt = Sample::datatype();
    assert_eq!(member_names(&dt), ["id", "temp_c", "valid", "window"]);
    // 4 + 8 + 1 + 3 * 2
    assert_eq!(dt.type_size(), 19);
    match &dt {
        Datatype::Compound { members, .. } => {
            let offsets: Vec<u64> = members.iter().map(|m| m.byte_offset).collect();
            assert_eq!(offsets, [0, 4, 12, 13]);
        }
        other => panic!("expected compound, got {other:?}"),
    }
}

#[test]
fn fixed_size_record_round_trip() {
    let codec = Codec::default();
    let bytes = codec.encode_from(&sample()).unwrap();
    assert_eq!(bytes.len(), 19);
    assert_eq!(&bytes[0..4], &7u32.to_le_bytes());
    assert_eq!(codec.decode_as::<Sample>(&bytes).unwrap(), sample());
}

#[test]
fn nested_record_with_heap_members() {
    let store = GlobalHeapStore::new(HeapProps::default());
    let codec = Codec::default().with_global_heap(&store);
    let station = Station {
        name: "north ridge".into(),
        readings: vec![0.5, 1.5, -3.0],
        latest: sample(),
    };
    let bytes = codec.encode_from(&station).unwrap();
    // two 16-byte descriptors and the nested sample
    assert_eq!(bytes.len(), 16 + 16 + 19);
    assert_eq!(codec.decode_as::<Station>(&bytes).unwrap(), station);
}

#[test]
fn missing_member_is_an_error() {
    let partial = Value::Compound(vec![("id".into(), Value::UInt(1))]);
    assert_eq!(
        Sample::from_value(&partial),
        Err(FormatError::MissingCompoundMember("temp_c".into()))
    );
}
