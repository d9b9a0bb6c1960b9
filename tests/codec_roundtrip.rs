//! Encode/decode round trips over catalogs that exercise every dtype, a
//! scalar, a high-rank tensor and an empty catalog.

use half::f16;
use tbf1::{
    decode, encode, encode_to_vec, record_len, Catalog, DtypeTag, SourceTensor, PREAMBLE_LEN,
};

fn mixed_catalog() -> Vec<SourceTensor<'static>> {
    let f32_vals: Vec<f32> = (1..=6).map(|v| v as f32).collect();
    let f16_vals: Vec<f16> = [0.5f32, -1.25, 3.0, 65504.0].iter().map(|&v| f16::from_f32(v)).collect();
    let high_rank: Vec<f32> = (0..24).map(|v| v as f32 * 0.25).collect();

    vec![
        SourceTensor::from_f32("embeddings.word_embeddings.weight", vec![2, 3], &f32_vals),
        SourceTensor::from_f16("embeddings.LayerNorm.weight", vec![4], &f16_vals),
        SourceTensor::from_f64("pooler.scale", vec![], &[std::f64::consts::PI]),
        SourceTensor::from_i64("embeddings.position_ids", vec![1, 5], &[0, 1, 2, 3, -4]),
        SourceTensor::from_i32("token_type_ids", vec![3], &[0, 1, i32::MAX]),
        SourceTensor::from_u8("attention_mask", vec![2, 2], &[1, 1, 1, 0]),
        SourceTensor::from_f32("encoder.layer.0.attention.self.query.weight", vec![2, 3, 1, 2, 2], &high_rank),
    ]
}

#[test]
fn roundtrip_preserves_name_dtype_shape_and_bytes_in_order() {
    let original = Catalog::build(mixed_catalog()).unwrap();
    let bytes = encode_to_vec(&original).unwrap();
    let decoded = decode(&bytes).unwrap();

    assert_eq!(decoded.len(), original.len());
    for (got, want) in decoded.iter().zip(original.iter()) {
        assert_eq!(got.name(), want.name());
        assert_eq!(got.dtype(), want.dtype());
        assert_eq!(got.shape(), want.shape());
        assert_eq!(got.byte_offset(), want.byte_offset());
        assert_eq!(got.byte_length(), want.byte_length());
        assert_eq!(got.data(), want.data());
    }

    let dtypes: Vec<DtypeTag> = decoded.iter().map(|e| e.dtype()).collect();
    for tag in DtypeTag::ALL {
        assert!(dtypes.contains(&tag), "{tag} missing from round trip");
    }
}

#[test]
fn roundtrip_values_read_back() {
    let bytes = encode(mixed_catalog()).unwrap();
    let catalog = decode(&bytes).unwrap();

    assert_eq!(
        catalog.lookup("embeddings.word_embeddings.weight").unwrap().to_f32_vec().unwrap(),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
    assert_eq!(
        catalog.lookup("embeddings.LayerNorm.weight").unwrap().to_f32_vec().unwrap(),
        vec![0.5, -1.25, 3.0, 65504.0]
    );
    let scalar = catalog.lookup("pooler.scale").unwrap();
    assert!(scalar.shape().is_empty());
    assert_eq!(scalar.byte_length(), 8);
    assert_eq!(
        catalog.lookup("token_type_ids").unwrap().to_i64_vec().unwrap(),
        vec![0, 1, i32::MAX as i64]
    );
    assert_eq!(
        catalog.lookup("attention_mask").unwrap().to_i64_vec().unwrap(),
        vec![1, 1, 1, 0]
    );
}

#[test]
fn offsets_are_contiguous_from_data_start() {
    let bytes = encode(mixed_catalog()).unwrap();
    let catalog = decode(&bytes).unwrap();

    let data_start = PREAMBLE_LEN
        + catalog
            .headers()
            .map(|h| record_len(h.name.len(), h.shape.len()))
            .sum::<u64>();
    assert_eq!(catalog.data_start(), data_start);
    assert_eq!(catalog.entries()[0].byte_offset(), data_start);

    for pair in catalog.entries().windows(2) {
        assert_eq!(pair[1].byte_offset(), pair[0].byte_offset() + pair[0].byte_length());
    }
    let last = catalog.entries().last().unwrap();
    assert_eq!(last.byte_offset() + last.byte_length(), bytes.len() as u64);
}

#[test]
fn byte_length_is_item_size_times_elements() {
    let bytes = encode(mixed_catalog()).unwrap();
    for entry in decode(&bytes).unwrap().iter() {
        assert_eq!(
            entry.byte_length(),
            entry.dtype().item_size() as u64 * entry.header.numel(),
            "{}",
            entry.name()
        );
    }
}

#[test]
fn empty_catalog_roundtrips() {
    let bytes = encode(Vec::new()).unwrap();
    assert_eq!(bytes.len(), 12);
    assert_eq!(&bytes[..4], b"TBF1");
    assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 0);

    let catalog = decode(&bytes).unwrap();
    assert!(catalog.is_empty());
    assert_eq!(catalog.data_start(), 12);
}

#[test]
fn zero_sized_tensor_sits_between_neighbours() {
    let bytes = encode(vec![
        SourceTensor::from_u8("a", vec![2], &[1, 2]),
        SourceTensor::from_f32("empty", vec![3, 0], &[]),
        SourceTensor::from_u8("b", vec![1], &[3]),
    ])
    .unwrap();
    let catalog = decode(&bytes).unwrap();
    let empty = catalog.lookup("empty").unwrap();
    assert_eq!(empty.byte_length(), 0);
    assert_eq!(catalog.lookup("b").unwrap().byte_offset(), empty.byte_offset());
    assert_eq!(catalog.lookup("b").unwrap().data(), &[3]);
}

#[test]
fn unicode_names_are_measured_in_utf8_bytes() {
    let name = "couche.poids.é.权重";
    let bytes = encode(vec![SourceTensor::from_u8(name, vec![1], &[42])]).unwrap();
    let catalog = decode(&bytes).unwrap();
    assert_eq!(catalog.data_start(), PREAMBLE_LEN + record_len(name.len(), 1));
    assert_eq!(catalog.lookup(name).unwrap().data(), &[42]);
}
