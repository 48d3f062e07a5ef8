//! Whole-crate properties: every datatype class survives encode/decode and
//! its own message encoding, and every built-in filter survives its pipeline.

use hdf5kit_format::datatype::{CharacterSet, DatatypeByteOrder, StringPadding};
use hdf5kit_format::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_NBIT, FILTER_SCALEOFFSET,
};
use hdf5kit_format::filters::ChunkPipeline;
use hdf5kit_format::nbit::NBitParams;
use hdf5kit_format::property_list::{CodecProps, FilterProps};
use hdf5kit_format::scale_offset::ScaleOffsetParams;
use hdf5kit_format::type_builders::*;
use hdf5kit_format::value::BitVector;
use hdf5kit_format::{Codec, Datatype, FormatError, Value};
use num_bigint::BigInt;

fn round_trip(dt: &Datatype, value: Value) {
    let (parsed, _) = Datatype::parse(&dt.serialize()).unwrap();
    assert_eq!(&parsed, dt);
    let codec = Codec::default();
    let bytes = codec.encode(&parsed, &value).unwrap();
    assert_eq!(bytes.len(), dt.type_size() as usize);
    assert_eq!(codec.decode(dt, &bytes).unwrap(), value, "{}", dt.class_name());
}

#[test]
fn integer_boundaries() {
    round_trip(&make_i8_type(), Value::Int(i8::MIN as i64));
    round_trip(&make_i16_type(), Value::Int(-1));
    round_trip(&make_i64_type(), Value::Int(i64::MAX));
    round_trip(&make_u8_type(), Value::UInt(0));
    round_trip(&make_u64_type(), Value::UInt(u64::MAX));
    round_trip(
        &make_int_type(4, true, DatatypeByteOrder::BigEndian),
        Value::Int(-123_456),
    );
    round_trip(
        &make_int_type(16, true, DatatypeByteOrder::LittleEndian),
        Value::BigInt(BigInt::from(i128::MIN)),
    );
    round_trip(
        &make_int_type(16, false, DatatypeByteOrder::BigEndian),
        Value::BigInt(BigInt::from(u128::MAX)),
    );
}

#[test]
fn time_values() {
    round_trip(&make_time_type(8), Value::Int(-1_700_000_000));
    round_trip(&make_time_type(4), Value::Int(i32::MAX as i64));
    let narrow = Datatype::Time {
        size: 4,
        byte_order: DatatypeByteOrder::BigEndian,
        bit_precision: 24,
    };
    round_trip(&narrow, Value::Int(-8_388_608));
    assert_eq!(
        Codec::default().encode(&narrow, &Value::Int(1 << 23)),
        Err(FormatError::ValueOutOfRange)
    );
}

#[test]
fn float_classes() {
    round_trip(&make_f16_type(), Value::Float(1.5));
    round_trip(&make_f32_type(), Value::Float(-0.25));
    round_trip(&make_f64_type(), Value::Float(f64::MIN_POSITIVE));
    round_trip(
        &make_f64_type_with_order(DatatypeByteOrder::BigEndian),
        Value::Float(f64::INFINITY),
    );
}

#[test]
fn float_edge_patterns() {
    let dt = make_f32_type();
    let decode = |b: [u8; 4]| Codec::default().decode(&dt, &b).unwrap().as_f64().unwrap();
    let zero = decode([0, 0, 0, 0]);
    assert!(zero == 0.0 && zero.is_sign_positive());
    assert_eq!(decode([0, 0, 0x80, 0x7F]), f64::INFINITY);
    assert_eq!(decode([0, 0, 0x80, 0xFF]), f64::NEG_INFINITY);
    assert!(decode([1, 0, 0x80, 0x7F]).is_nan());
}

#[test]
fn text_bits_and_blobs() {
    round_trip(
        &make_string_type(12, StringPadding::NullPad, CharacterSet::Utf8),
        Value::String("héllo".into()),
    );
    round_trip(
        &make_string_type(6, StringPadding::SpacePad, CharacterSet::Ascii),
        Value::String("ab".into()),
    );
    round_trip(&make_bitfield_type(2), Value::Bits(BitVector::from_u64(0xFFFF, 16)));
    round_trip(&make_opaque_type(4, "raw"), Value::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF]));
}

#[test]
fn compound_members_ignore_padding() {
    let dt = CompoundTypeBuilder::new()
        .field_at("count", 0, make_i16_type())
        .field_at("mean", 8, make_f64_type())
        .size(16)
        .build()
        .unwrap();
    let mut record = vec![0xAA; 16];
    record[0..2].copy_from_slice(&(-2i16).to_le_bytes());
    record[8..16].copy_from_slice(&2.5f64.to_le_bytes());
    let value = Codec::default().decode(&dt, &record).unwrap();
    assert_eq!(value.member("count"), Some(&Value::Int(-2)));
    assert_eq!(value.member("mean"), Some(&Value::Float(2.5)));
    round_trip(&dt, value);

    let overlapping = CompoundTypeBuilder::new()
        .field_at("a", 0, make_i32_type())
        .field_at("b", 2, make_i32_type())
        .build();
    assert!(overlapping.is_err());
}

#[test]
fn arrays_and_enums() {
    let grid = make_array_type(make_i16_type(), &[2, 3]).unwrap();
    round_trip(&grid, Value::Array((0..6).map(Value::Int).collect()));

    let color = EnumTypeBuilder::u8_based()
        .value("RED", 0)
        .value("GREEN", 1)
        .value("BLUE", 2)
        .build()
        .unwrap();
    round_trip(&color, Value::Enum("BLUE".into()));
    assert_eq!(
        Codec::default().decode(&color, &[0xFF]).unwrap(),
        Value::Enum("undefined".into())
    );
    let strict = Codec::new(CodecProps::new().strict_enums());
    assert_eq!(strict.decode(&color, &[0xFF]), Err(FormatError::UndefinedEnumValue));
}

fn filter_round_trip(desc: FilterDescription, element_size: u32, raw: &[u8]) -> Vec<u8> {
    let pipeline = ChunkPipeline::new(
        &FilterPipeline::new(vec![desc]),
        element_size,
        &FilterProps::default(),
    )
    .unwrap();
    let (stored, mask) = pipeline.apply(raw).unwrap();
    assert_eq!(mask, 0);
    assert_eq!(pipeline.reverse(&stored, mask).unwrap(), raw);
    stored
}

#[test]
#[cfg(feature = "deflate")]
fn deflate_shrinks_repetitive_chunks() {
    let raw: Vec<u8> = (0..4000u32).flat_map(|i| (i / 100).to_le_bytes()).collect();
    let stored = filter_round_trip(FilterDescription::deflate(9), 4, &raw);
    assert!(stored.len() < raw.len() / 4);
}

#[test]
fn shuffle_and_checksum_round_trip() {
    let raw: Vec<u8> = (0..333u32).flat_map(|i| (i * 7919).to_le_bytes()).collect();
    filter_round_trip(FilterDescription::shuffle(4), 4, &raw);
    let stored = filter_round_trip(FilterDescription::fletcher32(), 4, &raw);
    assert_eq!(stored.len(), raw.len() + 4);
}

#[test]
fn nbit_round_trip_with_12_bit_window() {
    let values: Vec<i32> = (0..100).map(|i| (i * 41) % 4096 - 2048).collect();
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let params = NBitParams {
        element_count: values.len() as u32,
        signed: true,
        element_size: 4,
        big_endian: false,
        precision: 12,
        offset: 0,
    };
    let stored = filter_round_trip(
        FilterDescription::new(FILTER_NBIT, params.to_client_data()),
        4,
        &raw,
    );
    assert_eq!(stored.len(), (100 * 12usize).div_ceil(8));
}

#[test]
fn scale_offset_round_trip() {
    let values: Vec<i64> = (0..77).map(|i| 1_000_000 + (i * 13) % 500).collect();
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let params = ScaleOffsetParams::integer(8, true, values.len() as u32);
    let stored = filter_round_trip(
        FilterDescription::new(FILTER_SCALEOFFSET, params.to_client_data()),
        8,
        &raw,
    );
    assert!(stored.len() < raw.len() / 4);
}
