use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use tally_scan::{
    Catalog, CatalogConfig, CatalogError, CatalogUnit, Cataloger, ContainerKind, ErrorKind,
    HashAlgorithm, HashKey, Operation, RecordOrigin, STAGE_PREFIX, TraverseContext, Traverser,
};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

enum Entry {
    File(String, Vec<u8>),
    Dir(String),
}

fn file(name: &str, data: &[u8]) -> Entry {
    Entry::File(name.to_string(), data.to_vec())
}

fn zip_of(entries: Vec<Entry>) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for entry in entries {
        match entry {
            Entry::File(name, data) => {
                writer.start_file(name, options).unwrap();
                writer.write_all(&data).unwrap();
            }
            Entry::Dir(name) => {
                writer.add_directory(name, options).unwrap();
            }
        }
    }
    writer.finish().unwrap().into_inner()
}

fn run(config: &CatalogConfig) -> Catalog {
    Cataloger::new().catalog(config).unwrap()
}

fn count_staged(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(STAGE_PREFIX))
        .count()
}

/// outer.zip holds inner.zip, which holds `payload.txt`.
fn nested_fixture(dir: &Path) -> PathBuf {
    let inner = zip_of(vec![file("payload.txt", b"nested payload")]);
    let outer = dir.join("outer.zip");
    fs::write(&outer, zip_of(vec![file("inner.zip", &inner)])).unwrap();
    outer
}

#[test]
fn test_identical_files_share_one_key() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), "same content").unwrap();
    fs::write(root.join("b.txt"), "same content").unwrap();

    let catalog = run(&CatalogConfig::new([&root]));

    assert_eq!(catalog.files().len(), 2);
    assert!(catalog.errors().is_empty());
    let groups = catalog.duplicate_groups();
    assert_eq!(groups.len(), 1);
    let names: Vec<_> = groups[0].records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(groups[0].key.algorithm, HashAlgorithm::Sha256);
}

#[test]
fn test_nested_archive_provenance() {
    let temp = TempDir::new().unwrap();
    let outer = nested_fixture(temp.path());

    let catalog = run(&CatalogConfig::new([&outer]));

    assert_eq!(catalog.files().len(), 1);
    let record = &catalog.files()[0];
    assert_eq!(record.provenance, vec!["outer.zip", "inner.zip"]);
    assert_eq!(record.name, "payload.txt");
    assert_eq!(record.folder_name(), "inner.zip");
    assert_eq!(record.origin, RecordOrigin::Archive);
    assert_eq!(record.path, outer.join("inner.zip").join("payload.txt"));
    assert_eq!(catalog.stats().archives, 2);
    assert!(catalog.errors().is_empty());
}

#[cfg(unix)]
#[test]
fn test_unreadable_entry_does_not_stop_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("readable.txt"), "fine").unwrap();
    std::os::unix::fs::symlink(root.join("missing-target"), root.join("dangling.txt")).unwrap();

    let catalog = run(&CatalogConfig::new([&root]));

    assert_eq!(catalog.files().len(), 1);
    assert_eq!(catalog.files()[0].name, "readable.txt");
    assert_eq!(catalog.errors().len(), 1);
    assert_eq!(catalog.errors()[0].kind, ErrorKind::ReadError);
    assert_eq!(catalog.errors()[0].path, root.join("dangling.txt"));
}

/// Whether the current user can read `path` despite its mode bits.
///
/// Root and CAP_DAC_OVERRIDE holders bypass permissions; the denied branch
/// of the permission tests only runs under an unprivileged user
/// (`setpriv --reuid=65534 cargo test` or a non-root CI job).
#[cfg(unix)]
fn bypasses_permissions(path: &Path) -> bool {
    let readable = if path.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    };
    if readable {
        eprintln!(
            "note: {} is readable despite mode 000; checking the privileged outcome only",
            path.display()
        );
    }
    readable
}

#[cfg(unix)]
#[test]
fn test_permission_denied_is_read_error() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("open.txt"), "fine").unwrap();
    let locked = root.join("locked.txt");
    fs::write(&locked, "secret").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    let privileged = bypasses_permissions(&locked);

    let catalog = run(&CatalogConfig::new([&root]));
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    if privileged {
        assert_eq!(catalog.files().len(), 2);
        assert!(catalog.errors().is_empty());
    } else {
        assert_eq!(catalog.files().len(), 1);
        let errors: Vec<_> = catalog.errors_of_kind(ErrorKind::ReadError).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, locked);
    }
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    let locked = root.join("locked");
    fs::create_dir_all(&locked).unwrap();
    fs::write(root.join("ok.txt"), "fine").unwrap();
    fs::write(locked.join("secret.txt"), "secret").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    let privileged = bypasses_permissions(&locked);

    let catalog = run(&CatalogConfig::new([&root]));
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(catalog.stats().directories, 2);
    assert!(catalog.empty_containers().is_empty());
    if privileged {
        assert_eq!(catalog.files().len(), 2);
        assert!(catalog.errors().is_empty());
    } else {
        assert_eq!(catalog.files().len(), 1);
        assert_eq!(catalog.files()[0].name, "ok.txt");
        assert_eq!(catalog.errors().len(), 1);
        let error = &catalog.errors()[0];
        assert_eq!(error.kind, ErrorKind::ReadError);
        assert_eq!(error.operation, Operation::Open);
        assert_eq!(error.path, locked);
    }
}

#[cfg(unix)]
#[test]
fn test_linked_root_directories_are_cataloged() {
    let temp = TempDir::new().unwrap();
    let empty_real = temp.path().join("empty-real");
    let full_real = temp.path().join("full-real");
    fs::create_dir(&empty_real).unwrap();
    fs::create_dir(&full_real).unwrap();
    fs::write(full_real.join("a.txt"), "a").unwrap();
    let empty_link = temp.path().join("empty-link");
    let full_link = temp.path().join("full-link");
    std::os::unix::fs::symlink(&empty_real, &empty_link).unwrap();
    std::os::unix::fs::symlink(&full_real, &full_link).unwrap();

    let catalog = run(&CatalogConfig::new([&empty_link, &full_link]));

    assert!(catalog.errors().is_empty());
    assert_eq!(catalog.stats().directories, 2);
    assert_eq!(catalog.empty_containers().len(), 1);
    assert_eq!(catalog.empty_containers()[0].provenance_string(), "empty-link");
    assert_eq!(catalog.files().len(), 1);
    assert_eq!(catalog.files()[0].provenance, vec!["full-link"]);
}

#[test]
fn test_budget_exceeded_caps_records() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("bomb.zip");
    let entries = (0..1001)
        .map(|i| Entry::File(format!("e{i:04}.txt"), vec![b'x']))
        .collect();
    fs::write(&archive, zip_of(entries)).unwrap();

    let catalog = run(&CatalogConfig::new([&archive]));

    assert_eq!(catalog.files().len(), 1000);
    let errors: Vec<_> = catalog.errors_of_kind(ErrorKind::BudgetExceeded).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, archive);
    assert_eq!(catalog.errors().len(), 1);
}

#[test]
fn test_budget_is_shared_with_nested_archives() {
    let temp = TempDir::new().unwrap();
    let inner = zip_of(vec![
        file("a.txt", b"a"),
        file("b.txt", b"b"),
        file("c.txt", b"c"),
    ]);
    let outer = temp.path().join("outer.zip");
    fs::write(
        &outer,
        zip_of(vec![
            file("inner.zip", &inner),
            file("z.txt", b"z"),
        ]),
    )
    .unwrap();

    let config = CatalogConfig::builder()
        .roots(vec![outer.clone()])
        .archive_entry_budget(3usize)
        .build()
        .unwrap();
    let catalog = run(&config);

    assert_eq!(catalog.files().len(), 2);
    let truncated: Vec<_> = catalog
        .errors_of_kind(ErrorKind::BudgetExceeded)
        .map(|e| e.path.clone())
        .collect();
    assert_eq!(truncated, vec![outer.join("inner.zip"), outer.clone()]);
}

#[test]
fn test_separate_archives_get_separate_budgets() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    for name in ["one.zip", "two.zip"] {
        let data = zip_of(vec![
            file("a.txt", name.as_bytes()),
            file("b.txt", b"b"),
        ]);
        fs::write(root.join(name), data).unwrap();
    }

    let config = CatalogConfig::builder()
        .roots(vec![root])
        .archive_entry_budget(2usize)
        .build()
        .unwrap();
    let catalog = run(&config);

    assert_eq!(catalog.files().len(), 4);
    assert!(catalog.errors().is_empty());
}

#[test]
fn test_runs_are_reproducible() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir_all(root.join("sub/deeper")).unwrap();
    fs::write(root.join("b.txt"), "b").unwrap();
    fs::write(root.join("a.txt"), "a").unwrap();
    fs::write(root.join("sub/deeper/c.txt"), "c").unwrap();
    nested_fixture(&root.join("sub"));

    let config = CatalogConfig::new([&root]);
    let first = run(&config);
    let second = run(&config);

    assert_eq!(first, second);
    assert_eq!(first.files().len(), 4);
}

#[test]
fn test_sequential_matches_parallel_with_archives() {
    let temp = TempDir::new().unwrap();
    let left = temp.path().join("left");
    let right = temp.path().join("right");
    fs::create_dir(&left).unwrap();
    fs::create_dir(&right).unwrap();
    nested_fixture(&left);
    fs::write(right.join("x.txt"), "nested payload").unwrap();

    let build = |threads: usize| {
        CatalogConfig::builder()
            .roots(vec![left.clone(), right.clone()])
            .threads(threads)
            .build()
            .unwrap()
    };
    let sequential = run(&build(1));
    let parallel = run(&build(0));

    assert_eq!(sequential, parallel);
    assert_eq!(sequential.duplicate_groups().len(), 1);
    assert_eq!(sequential.files()[0].origin, RecordOrigin::Archive);
}

#[test]
fn test_empty_directory_and_archive_are_reported() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir_all(root.join("hollow")).unwrap();
    fs::write(root.join("void.zip"), zip_of(Vec::new())).unwrap();

    let catalog = run(&CatalogConfig::new([&root]));

    assert!(catalog.files().is_empty());
    let empty: Vec<_> = catalog
        .empty_containers()
        .iter()
        .map(|c| (c.kind, c.provenance_string()))
        .collect();
    assert_eq!(
        empty,
        vec![
            (ContainerKind::Directory, "case/hollow".to_string()),
            (ContainerKind::Archive, "case/void.zip".to_string()),
        ]
    );
}

#[test]
fn test_empty_directory_inside_archive() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("tree.zip");
    fs::write(
        &archive,
        zip_of(vec![
            Entry::Dir("full/".to_string()),
            file("full/f.txt", b"f"),
            Entry::Dir("full/hollow/".to_string()),
        ]),
    )
    .unwrap();

    let catalog = run(&CatalogConfig::new([&archive]));

    let empty: Vec<_> = catalog
        .empty_containers()
        .iter()
        .map(|c| c.provenance_string())
        .collect();
    assert_eq!(empty, vec!["tree.zip/full/hollow"]);
    assert_eq!(catalog.files()[0].provenance, vec!["tree.zip", "full"]);
}

#[test]
fn test_zero_byte_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("lonely.txt"), "").unwrap();

    let catalog = run(&CatalogConfig::new([&root]));
    assert_eq!(catalog.empty_files(), &[root.join("lonely.txt")]);
    assert!(catalog.duplicate_groups().is_empty());
    assert_eq!(
        catalog
            .records_for(&HashKey::new(HashAlgorithm::Sha256, EMPTY_SHA256))
            .len(),
        1
    );

    fs::write(
        root.join("bundle.zip"),
        zip_of(vec![file("also-empty.txt", b"")]),
    )
    .unwrap();
    let catalog = run(&CatalogConfig::new([&root]));
    assert_eq!(catalog.empty_files().len(), 2);
    let groups = catalog.duplicate_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count(), 2);
}

#[test]
fn test_corrupt_archive_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("case");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a-broken.zip"), b"PK\x03\x04 definitely not a zip").unwrap();
    fs::write(root.join("b-fine.txt"), "fine").unwrap();

    let catalog = run(&CatalogConfig::new([&root]));

    assert_eq!(catalog.files().len(), 1);
    let errors: Vec<_> = catalog.errors().iter().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ArchiveOpenError);
    assert_eq!(errors[0].path, root.join("a-broken.zip"));
}

#[test]
fn test_include_archive_files() {
    let temp = TempDir::new().unwrap();
    let outer = nested_fixture(temp.path());

    let config = CatalogConfig::builder()
        .roots(vec![outer.clone()])
        .catalog_archive_files(true)
        .build()
        .unwrap();
    let catalog = run(&config);

    let paths: Vec<_> = catalog.files().iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            outer.clone(),
            outer.join("inner.zip"),
            outer.join("inner.zip").join("payload.txt"),
        ]
    );
    assert_eq!(catalog.files()[0].origin, RecordOrigin::Filesystem);
    assert_eq!(catalog.files()[1].origin, RecordOrigin::Archive);
}

#[test]
fn test_algorithm_choice_is_applied() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("abc.txt");
    fs::write(&file, "abc").unwrap();

    let config = CatalogConfig::builder()
        .roots(vec![file.clone()])
        .hash_algorithm(HashAlgorithm::Md5)
        .build()
        .unwrap();
    let catalog = run(&config);

    assert_eq!(catalog.files()[0].hash, "900150983cd24fb0d6963f7d28e17f72");
    assert_eq!(catalog.files()[0].algorithm, HashAlgorithm::Md5);
    assert_eq!(catalog.algorithm(), HashAlgorithm::Md5);
}

#[test]
fn test_duplicate_roots_are_walked_once() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("once.txt");
    fs::write(&file, "once").unwrap();

    let catalog = run(&CatalogConfig::new([&file, &file]));
    assert_eq!(catalog.roots(), &[file.clone()]);
    assert_eq!(catalog.files().len(), 1);
}

#[test]
fn test_staged_files_are_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let outer = nested_fixture(temp.path());

    let config = CatalogConfig::builder()
        .roots(vec![outer])
        .staging_dir(Some(staging.path().to_path_buf()))
        .build()
        .unwrap();
    let catalog = run(&config);

    assert_eq!(catalog.files().len(), 1);
    assert_eq!(count_staged(staging.path()), 0);
}

#[test]
fn test_cancellation_mid_archive_releases_staging() {
    let temp = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let inner = zip_of(vec![
        file("first.txt", b"1"),
        file("second.txt", b"2"),
    ]);
    let outer = temp.path().join("outer.zip");
    fs::write(&outer, zip_of(vec![file("inner.zip", &inner)])).unwrap();

    let config = CatalogConfig::builder()
        .roots(vec![outer.clone()])
        .staging_dir(Some(staging.path().to_path_buf()))
        .build()
        .unwrap();
    let token = CancellationToken::new();
    let ctx = TraverseContext::new(&config, token.clone());
    let mut traverser = Traverser::new(&ctx, &outer);

    loop {
        match traverser.next() {
            Some(Ok(CatalogUnit::File(record))) => {
                assert_eq!(record.name, "first.txt");
                break;
            }
            Some(Ok(_)) => {}
            other => panic!("unexpected item: {other:?}"),
        }
    }
    assert_eq!(count_staged(staging.path()), 1);

    token.cancel();
    assert!(matches!(traverser.next(), Some(Err(CatalogError::Cancelled))));
    assert!(traverser.next().is_none());
    assert_eq!(count_staged(staging.path()), 0);
}

#[test]
fn test_unwritable_staging_area_aborts_run() {
    let temp = TempDir::new().unwrap();
    let outer = nested_fixture(temp.path());

    let config = CatalogConfig::builder()
        .roots(vec![outer])
        .staging_dir(Some(temp.path().join("missing-dir")))
        .build()
        .unwrap();

    let result = Cataloger::new().catalog(&config);
    assert!(matches!(result, Err(CatalogError::Staging { .. })));
}
