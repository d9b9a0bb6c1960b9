//! Writing to and mapping from real files.

use tbf1::{write_file, Catalog, SourceTensor, TbfError, TbfFile, WriteOptions};
use tempfile::tempdir;

fn bert_like() -> Catalog<'static> {
    Catalog::build(vec![
        SourceTensor::from_f32("embeddings.LayerNorm.weight", vec![4], &[1.0, 1.0, 1.0, 1.0]),
        SourceTensor::from_f32("embeddings.LayerNorm.bias", vec![4], &[0.0, 0.1, 0.2, 0.3]),
        SourceTensor::from_i64("embeddings.position_ids", vec![1, 3], &[0, 1, 2]),
    ])
    .unwrap()
}

#[test]
fn written_file_maps_back_zero_copy() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.tbf");
    let catalog = bert_like();

    let written = write_file(&path, &catalog, &WriteOptions::default()).unwrap();
    assert_eq!(written, std::fs::metadata(&path).unwrap().len());

    let file = TbfFile::open(&path).unwrap();
    assert_eq!(file.len(), 3);
    assert_eq!(file.path(), path.as_path());

    let mapped = file.catalog();
    assert_eq!(mapped.data_start(), catalog.data_start());
    let bias = mapped.lookup("embeddings.LayerNorm.bias").unwrap();
    assert_eq!(bias.to_f32_vec().unwrap(), vec![0.0, 0.1, 0.2, 0.3]);

    // the tensor bytes live inside the mapping
    let mapping = file.as_bytes().as_ptr_range();
    assert!(mapping.contains(&bias.data().as_ptr()));
}

#[test]
fn verified_write_succeeds_on_good_catalog() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("verified.tbf");
    write_file(&path, &bert_like(), &WriteOptions::verified()).unwrap();
    assert!(TbfFile::open(&path).is_ok());
}

#[test]
fn empty_catalog_writes_twelve_bytes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.tbf");
    write_file(&path, &Catalog::default(), &WriteOptions::verified()).unwrap();
    assert_eq!(std::fs::read(&path).unwrap().len(), 12);
    assert!(TbfFile::open(&path).unwrap().is_empty());
}

#[test]
fn file_lookup_by_name() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lookup.tbf");
    write_file(&path, &bert_like(), &WriteOptions::default()).unwrap();

    let file = TbfFile::open(&path).unwrap();
    let ids = file.lookup("embeddings.position_ids").unwrap();
    assert_eq!(ids.shape(), &[1, 3]);
    assert_eq!(ids.to_i64_vec().unwrap(), vec![0, 1, 2]);
    assert_eq!(file.tensor_data(2), Some(ids.data()));
    assert!(file.tensor_data(3).is_none());

    assert!(matches!(
        file.lookup("pooler.dense.weight"),
        Err(TbfError::NotFound { .. })
    ));
}

#[test]
fn missing_file_is_io_error_with_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.tbf");
    match TbfFile::open(&path) {
        Err(TbfError::Io { context, .. }) => assert!(context.contains("absent.tbf")),
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn corrupted_file_fails_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.tbf");
    write_file(&path, &bert_like(), &WriteOptions::default()).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 1);
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(TbfFile::open(&path), Err(TbfError::Truncated { .. })));
}

#[test]
fn write_into_missing_directory_is_io_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("no_such_dir").join("model.tbf");
    match write_file(&path, &bert_like(), &WriteOptions::default()) {
        Err(TbfError::Io { context, .. }) => assert!(context.starts_with("creating")),
        other => panic!("expected Io error, got {other:?}"),
    }
}
