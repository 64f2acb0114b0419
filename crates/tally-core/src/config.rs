//! Catalog run configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::algorithm::HashAlgorithm;
use crate::error::CatalogError;

/// Default cap on entries expanded from one archive chain.
pub const DEFAULT_ARCHIVE_ENTRY_BUDGET: usize = 1000;

/// Configuration for a cataloging run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct CatalogConfig {
    /// Selected roots, in selection order. Files, directories or archives.
    pub roots: Vec<PathBuf>,

    /// Digest used for every file in the run.
    #[builder(default)]
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Maximum entries expanded from one archive and the archives nested in it.
    #[builder(default = "DEFAULT_ARCHIVE_ENTRY_BUDGET")]
    #[serde(default = "default_archive_entry_budget")]
    pub archive_entry_budget: usize,

    /// Also hash each archive's own bytes as a file record.
    #[builder(default = "false")]
    #[serde(default)]
    pub catalog_archive_files: bool,

    /// Directory for staged archive entries (None = system temp dir).
    #[builder(default)]
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// File extensions treated as zip archives (case-insensitive, no dot).
    #[builder(default = "default_archive_extensions()")]
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Number of worker threads (0 = auto-detect, 1 = sequential).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,
}

fn default_archive_entry_budget() -> usize {
    DEFAULT_ARCHIVE_ENTRY_BUDGET
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".to_string()]
}

impl CatalogConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.roots {
            Some(ref roots) if roots.is_empty() => {
                return Err("At least one root path is required".to_string());
            }
            Some(ref roots) => {
                if roots.iter().any(|r| r.as_os_str().is_empty()) {
                    return Err("Root path cannot be empty".to_string());
                }
            }
            None => return Err("Root paths are required".to_string()),
        }
        if let Some(0) = self.archive_entry_budget {
            return Err("Archive entry budget must be at least 1".to_string());
        }
        Ok(())
    }
}

impl CatalogConfig {
    /// Create a new config builder.
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }

    /// Create a config with defaults for the given roots.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            hash_algorithm: HashAlgorithm::default(),
            archive_entry_budget: DEFAULT_ARCHIVE_ENTRY_BUDGET,
            catalog_archive_files: false,
            staging_dir: None,
            archive_extensions: default_archive_extensions(),
            threads: 0,
        }
    }

    /// Check a config that was built without the builder (e.g. deserialized).
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.roots.is_empty() {
            return Err(CatalogError::InvalidConfig {
                message: "At least one root path is required".to_string(),
            });
        }
        if self.roots.iter().any(|r| r.as_os_str().is_empty()) {
            return Err(CatalogError::InvalidConfig {
                message: "Root path cannot be empty".to_string(),
            });
        }
        if self.archive_entry_budget == 0 {
            return Err(CatalogError::InvalidConfig {
                message: "Archive entry budget must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Roots in selection order with repeated selections removed.
    pub fn unique_roots(&self) -> Vec<PathBuf> {
        let mut seen = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if !seen.contains(root) {
                seen.push(root.clone());
            }
        }
        seen
    }

    /// Check if a path names an archive by its extension.
    pub fn is_archive_path(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy())
            .is_some_and(|ext| self.is_archive_extension(&ext))
    }

    /// Check if an archive entry name names an archive by its extension.
    pub fn is_archive_name(&self, name: &str) -> bool {
        if name.ends_with('/') {
            return false;
        }
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') => {
                self.is_archive_extension(ext)
            }
            _ => false,
        }
    }

    fn is_archive_extension(&self, ext: &str) -> bool {
        self.archive_extensions
            .iter()
            .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::new(["."])
    }
}
