//! File records, container nodes and the units a traversal produces.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use compact_str::CompactString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::algorithm::HashAlgorithm;
use crate::error::{CatalogError, ErrorRecord};

/// Where a record's bytes were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// A regular file on disk.
    Filesystem,
    /// A member of a zip archive (possibly nested).
    Archive,
}

/// One cataloged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Display path. Archive members are shown below the archive path.
    pub path: PathBuf,

    /// File name (last path component).
    pub name: CompactString,

    /// Path of the immediate container.
    pub folder_path: PathBuf,

    /// Size in bytes, as counted while hashing.
    pub size: u64,

    /// Lowercase hex digest.
    pub hash: String,

    /// Algorithm that produced `hash`.
    pub algorithm: HashAlgorithm,

    /// Container names from the selected root down to this file.
    pub provenance: Vec<CompactString>,

    /// Whether the bytes came from disk or from an archive.
    pub origin: RecordOrigin,
}

impl FileRecord {
    /// Create a record for a file at `path`.
    ///
    /// The name and folder path are derived from `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        size: u64,
        hash: impl Into<String>,
        algorithm: HashAlgorithm,
        provenance: Vec<CompactString>,
        origin: RecordOrigin,
    ) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_else(|| CompactString::new(path.to_string_lossy()));
        let folder_path = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self {
            path,
            name,
            folder_path,
            size,
            hash: hash.into(),
            algorithm,
            provenance,
            origin,
        }
    }

    /// Name of the immediate container.
    pub fn folder_name(&self) -> CompactString {
        if let Some(last) = self.provenance.last() {
            return last.clone();
        }
        self.folder_path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Whether the file had no content.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Key used for duplicate grouping.
    pub fn hash_key(&self) -> HashKey {
        HashKey::new(self.algorithm, self.hash.clone())
    }
}

/// Kind of container encountered during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Directory,
    Archive,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "folder"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// A directory or archive seen during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerNode {
    /// Container name.
    pub name: CompactString,
    /// Directory or archive.
    pub kind: ContainerKind,
    /// True when the container had zero entries.
    pub empty: bool,
    /// Display path of the container.
    pub path: PathBuf,
    /// Container names from the selected root down to and including this one.
    pub provenance: Vec<CompactString>,
}

impl ContainerNode {
    /// Create a new container node. `provenance` must end with `name`.
    pub fn new(
        kind: ContainerKind,
        path: impl Into<PathBuf>,
        provenance: Vec<CompactString>,
        empty: bool,
    ) -> Self {
        let name = provenance.last().cloned().unwrap_or_default();
        Self {
            name,
            kind,
            empty,
            path: path.into(),
            provenance,
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == ContainerKind::Directory
    }

    /// Check if this is an archive.
    pub fn is_archive(&self) -> bool {
        self.kind == ContainerKind::Archive
    }
}

/// One item of a traversal's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogUnit {
    /// A hashed file.
    File(FileRecord),
    /// A directory or archive.
    Container(ContainerNode),
    /// A recoverable failure.
    Error(ErrorRecord),
}

impl CatalogUnit {
    /// Check if this is a file unit.
    pub fn is_file(&self) -> bool {
        matches!(self, CatalogUnit::File(_))
    }

    /// Check if this is an error unit.
    pub fn is_error(&self) -> bool {
        matches!(self, CatalogUnit::Error(_))
    }
}

/// Duplicate-grouping key: the digest qualified by its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey {
    /// Algorithm that produced the digest.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub digest: String,
}

impl HashKey {
    /// Create a new key.
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            digest: digest.into(),
        }
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for HashKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s.split_once(':').ok_or_else(|| CatalogError::InvalidConfig {
            message: format!("hash key '{s}' is not of the form <algorithm>:<digest>"),
        })?;
        Ok(Self::new(HashAlgorithm::from_name(algorithm)?, digest))
    }
}

impl Serialize for HashKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HashKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
