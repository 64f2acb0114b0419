use std::path::PathBuf;

use tally_core::{
    CatalogAccumulator, CatalogConfig, CatalogUnit, ContainerKind, ContainerNode, ErrorKind,
    ErrorRecord, FileRecord, HashAlgorithm, HashKey, Operation, RecordOrigin,
};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn file(path: &str, digest: &str, size: u64, algorithm: HashAlgorithm) -> CatalogUnit {
    CatalogUnit::File(FileRecord::new(
        path,
        size,
        digest,
        algorithm,
        vec!["case".into()],
        RecordOrigin::Filesystem,
    ))
}

fn accumulator() -> CatalogAccumulator {
    CatalogAccumulator::for_config(&CatalogConfig::new(["/case"]))
}

#[test]
fn test_every_grouped_record_is_in_file_list() {
    let mut acc = accumulator();
    acc.extend([
        file("/case/a", "11", 3, HashAlgorithm::Sha256),
        file("/case/b", "22", 3, HashAlgorithm::Sha256),
        file("/case/c", "11", 3, HashAlgorithm::Sha256),
    ]);
    let catalog = acc.finish();

    for indices in catalog.hash_groups().values() {
        for &i in indices {
            assert!(i < catalog.files().len());
        }
    }
    let grouped: usize = catalog.hash_groups().values().map(Vec::len).sum();
    assert_eq!(grouped, catalog.files().len());

    let dups = catalog.duplicate_groups();
    assert_eq!(dups.len(), 1);
    let paths: Vec<_> = dups[0].records.iter().map(|r| r.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("/case/a"), PathBuf::from("/case/c")]);
}

#[test]
fn test_grouping_is_scoped_by_algorithm() {
    let mut acc = accumulator();
    acc.push(file("/case/a", "abcd", 4, HashAlgorithm::Sha256));
    acc.push(file("/case/b", "abcd", 4, HashAlgorithm::Blake3));
    let catalog = acc.finish();

    assert_eq!(catalog.hash_groups().len(), 2);
    assert!(!catalog.has_duplicates());
    assert_eq!(
        catalog.records_for(&HashKey::new(HashAlgorithm::Blake3, "abcd")).len(),
        1
    );
}

#[test]
fn test_lone_empty_file_is_not_a_duplicate() {
    let mut acc = accumulator();
    acc.push(file("/case/empty", EMPTY_SHA256, 0, HashAlgorithm::Sha256));
    acc.push(file("/case/full", "ff", 9, HashAlgorithm::Sha256));
    let catalog = acc.finish();

    assert_eq!(catalog.empty_files(), &[PathBuf::from("/case/empty")]);
    assert!(catalog.duplicate_groups().is_empty());
}

#[test]
fn test_two_empty_files_form_one_group() {
    let mut acc = accumulator();
    acc.push(file("/case/e1", EMPTY_SHA256, 0, HashAlgorithm::Sha256));
    acc.push(file("/case/e2", EMPTY_SHA256, 0, HashAlgorithm::Sha256));
    let catalog = acc.finish();

    assert_eq!(catalog.empty_files().len(), 2);
    let groups = catalog.duplicate_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count(), 2);
    assert_eq!(groups[0].wasted_bytes(), 0);
}

#[test]
fn test_errors_and_containers_are_routed() {
    let mut acc = accumulator();
    acc.push(CatalogUnit::Container(ContainerNode::new(
        ContainerKind::Archive,
        "/case/empty.zip",
        vec!["case".into(), "empty.zip".into()],
        true,
    )));
    acc.push(CatalogUnit::Error(ErrorRecord::budget_exceeded(
        "/case/bomb.zip",
        1000,
    )));
    acc.push(CatalogUnit::Error(ErrorRecord::new(
        "/case/locked",
        Operation::Open,
        ErrorKind::ReadError,
        "denied",
    )));
    assert_eq!(acc.error_count(), 2);
    let catalog = acc.finish();

    assert_eq!(catalog.stats().archives, 1);
    assert_eq!(catalog.empty_containers()[0].kind, ContainerKind::Archive);
    assert_eq!(
        catalog.empty_containers()[0].provenance_string(),
        "case/empty.zip"
    );
    assert_eq!(catalog.errors_of_kind(ErrorKind::BudgetExceeded).count(), 1);
    assert_eq!(catalog.errors_of_kind(ErrorKind::ReadError).count(), 1);
    assert!(catalog.files().is_empty());
}

#[test]
fn test_catalog_serde_round_trip() {
    let mut acc = accumulator();
    acc.push(file("/case/a", "11", 3, HashAlgorithm::Sha256));
    acc.push(file("/case/b", "11", 3, HashAlgorithm::Sha256));
    let catalog = acc.finish();

    let json = serde_json::to_string(&catalog).unwrap();
    assert!(json.contains("\"sha256:11\""));

    let restored: tally_core::Catalog = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, catalog);
}

#[test]
fn test_out_of_range_index_in_loaded_catalog_is_skipped() {
    let mut acc = accumulator();
    acc.push(file("/case/a", "11", 3, HashAlgorithm::Sha256));
    acc.push(file("/case/b", "11", 3, HashAlgorithm::Sha256));
    let json = serde_json::to_string(&acc.finish()).unwrap();
    assert!(json.contains("\"sha256:11\":[0,1]"));

    let edited = json.replace("\"sha256:11\":[0,1]", "\"sha256:11\":[0,7]");
    let catalog: tally_core::Catalog = serde_json::from_str(&edited).unwrap();

    let key = HashKey::new(HashAlgorithm::Sha256, "11");
    let records = catalog.records_for(&key);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, PathBuf::from("/case/a"));
    let groups = catalog.duplicate_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].records.len(), 1);
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: CatalogConfig = serde_json::from_str(r#"{"roots": ["/case"]}"#).unwrap();
    assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(config.archive_entry_budget, 1000);
    assert!(config.validate().is_ok());

    let config: CatalogConfig =
        serde_json::from_str(r#"{"roots": ["/case"], "hash_algorithm": "sha3-512"}"#).unwrap();
    assert_eq!(config.hash_algorithm, HashAlgorithm::Sha3_512);
}
