//! The catalog produced by a run and the accumulator that builds it.

use std::path::PathBuf;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::HashAlgorithm;
use crate::config::CatalogConfig;
use crate::error::{ErrorKind, ErrorRecord};
use crate::record::{CatalogUnit, ContainerKind, ContainerNode, FileRecord, HashKey, RecordOrigin};

/// Summary statistics for a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    /// Number of file records.
    pub total_files: u64,
    /// Sum of all file sizes.
    pub total_bytes: u64,
    /// File records that came from inside archives.
    pub archive_files: u64,
    /// Directories visited (roots included).
    pub directories: u64,
    /// Archives opened.
    pub archives: u64,
    /// Largest file (path, size).
    pub largest_file: Option<(PathBuf, u64)>,
}

impl CatalogStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a file record.
    pub fn record_file(&mut self, record: &FileRecord) {
        self.total_files += 1;
        self.total_bytes += record.size;
        if record.origin == RecordOrigin::Archive {
            self.archive_files += 1;
        }

        if self.largest_file.as_ref().is_none_or(|(_, s)| record.size > *s) {
            self.largest_file = Some((record.path.clone(), record.size));
        }
    }

    /// Record a visited container.
    pub fn record_container(&mut self, kind: ContainerKind) {
        match kind {
            ContainerKind::Directory => self.directories += 1,
            ContainerKind::Archive => self.archives += 1,
        }
    }
}

/// Notice for a directory or archive that had no entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyContainer {
    /// Display path of the container.
    pub path: PathBuf,
    /// Directory or archive.
    pub kind: ContainerKind,
    /// Container names from the selected root down to the container.
    pub provenance: Vec<CompactString>,
}

impl EmptyContainer {
    /// Provenance chain joined with `/`.
    pub fn provenance_string(&self) -> String {
        self.provenance.join("/")
    }
}

/// A group of records sharing one `(algorithm, digest)` key.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup<'a> {
    /// Shared key.
    pub key: &'a HashKey,
    /// Records in catalog order.
    pub records: Vec<&'a FileRecord>,
}

impl DuplicateGroup<'_> {
    /// Number of records in the group.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Size of each member.
    pub fn size(&self) -> u64 {
        self.records.first().map(|r| r.size).unwrap_or(0)
    }

    /// Bytes that are copies of another member: size * (count - 1).
    pub fn wasted_bytes(&self) -> u64 {
        self.size() * self.records.len().saturating_sub(1) as u64
    }
}

/// Complete inventory of one run.
///
/// Built by [`CatalogAccumulator`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    roots: Vec<PathBuf>,
    algorithm: HashAlgorithm,
    archive_entry_budget: usize,
    files: Vec<FileRecord>,
    hash_groups: IndexMap<HashKey, Vec<usize>>,
    empty_files: Vec<PathBuf>,
    empty_containers: Vec<EmptyContainer>,
    errors: Vec<ErrorRecord>,
    stats: CatalogStats,
}

impl Catalog {
    /// Roots in selection order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Algorithm the run was configured with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Entry budget that was in effect.
    pub fn archive_entry_budget(&self) -> usize {
        self.archive_entry_budget
    }

    /// All file records in traversal order.
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Mapping from hash key to indices into [`files`](Self::files).
    ///
    /// Singleton entries are kept; a key with one member is a unique file.
    pub fn hash_groups(&self) -> &IndexMap<HashKey, Vec<usize>> {
        &self.hash_groups
    }

    /// Records stored under a key, in catalog order.
    ///
    /// Indices that point past the file list (a hand-edited catalog) are
    /// skipped.
    pub fn records_for(&self, key: &HashKey) -> Vec<&FileRecord> {
        self.hash_groups
            .get(key)
            .map(|indices| self.resolve(indices))
            .unwrap_or_default()
    }

    fn resolve(&self, indices: &[usize]) -> Vec<&FileRecord> {
        indices.iter().filter_map(|&i| self.files.get(i)).collect()
    }

    /// Groups with two or more members, in first-seen order.
    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup<'_>> {
        self.hash_groups
            .iter()
            .filter(|(_, indices)| indices.len() >= 2)
            .map(|(key, indices)| DuplicateGroup {
                key,
                records: self.resolve(indices),
            })
            .collect()
    }

    /// Number of keys with exactly one member.
    pub fn unique_count(&self) -> usize {
        self.hash_groups.values().filter(|v| v.len() == 1).count()
    }

    /// Paths of zero-byte files.
    pub fn empty_files(&self) -> &[PathBuf] {
        &self.empty_files
    }

    /// Directories and archives with no entries.
    pub fn empty_containers(&self) -> &[EmptyContainer] {
        &self.empty_containers
    }

    /// Recoverable failures, in the order they occurred.
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Errors of one kind.
    pub fn errors_of_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    /// Summary statistics.
    pub fn stats(&self) -> &CatalogStats {
        &self.stats
    }

    /// Check if any entry failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if any duplicate group exists.
    pub fn has_duplicates(&self) -> bool {
        self.hash_groups.values().any(|v| v.len() >= 2)
    }
}

/// Folds traversal units into a [`Catalog`].
#[derive(Debug)]
pub struct CatalogAccumulator {
    catalog: Catalog,
}

impl CatalogAccumulator {
    /// Create an empty accumulator.
    pub fn new(roots: Vec<PathBuf>, algorithm: HashAlgorithm, archive_entry_budget: usize) -> Self {
        Self {
            catalog: Catalog {
                roots,
                algorithm,
                archive_entry_budget,
                files: Vec::new(),
                hash_groups: IndexMap::new(),
                empty_files: Vec::new(),
                empty_containers: Vec::new(),
                errors: Vec::new(),
                stats: CatalogStats::new(),
            },
        }
    }

    /// Create an accumulator for a run described by `config`.
    pub fn for_config(config: &CatalogConfig) -> Self {
        Self::new(
            config.unique_roots(),
            config.hash_algorithm,
            config.archive_entry_budget,
        )
    }

    /// Fold one unit.
    pub fn push(&mut self, unit: CatalogUnit) {
        match unit {
            CatalogUnit::File(record) => self.add_file(record),
            CatalogUnit::Container(node) => self.add_container(node),
            CatalogUnit::Error(error) => self.add_error(error),
        }
    }

    /// Append a file record.
    pub fn add_file(&mut self, record: FileRecord) {
        let index = self.catalog.files.len();
        self.catalog.stats.record_file(&record);
        if record.is_empty() {
            self.catalog.empty_files.push(record.path.clone());
        }
        self.catalog
            .hash_groups
            .entry(record.hash_key())
            .or_default()
            .push(index);
        self.catalog.files.push(record);
    }

    /// Record a container; only empty ones are kept.
    pub fn add_container(&mut self, node: ContainerNode) {
        self.catalog.stats.record_container(node.kind);
        if node.empty {
            self.catalog.empty_containers.push(EmptyContainer {
                path: node.path,
                kind: node.kind,
                provenance: node.provenance,
            });
        }
    }

    /// Append an error record.
    pub fn add_error(&mut self, error: ErrorRecord) {
        self.catalog.errors.push(error);
    }

    /// Number of file records so far.
    pub fn file_count(&self) -> usize {
        self.catalog.files.len()
    }

    /// Number of error records so far.
    pub fn error_count(&self) -> usize {
        self.catalog.errors.len()
    }

    /// Finish the run and hand out the catalog.
    pub fn finish(self) -> Catalog {
        let catalog = self.catalog;
        debug!(
            files = catalog.files.len(),
            keys = catalog.hash_groups.len(),
            errors = catalog.errors.len(),
            "catalog complete"
        );
        catalog
    }
}

impl Extend<CatalogUnit> for CatalogAccumulator {
    fn extend<T: IntoIterator<Item = CatalogUnit>>(&mut self, iter: T) {
        for unit in iter {
            self.push(unit);
        }
    }
}
