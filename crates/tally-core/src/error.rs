//! Error types for cataloging runs.
//!
//! Two layers exist: [`CatalogError`] aborts a run (bad configuration, a
//! staging area that cannot be written, cancellation), while
//! [`ErrorRecord`] describes a single entry that failed and is kept in the
//! catalog so the run can finish.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a cataloging run.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested digest algorithm is not in the supported set.
    #[error("Unsupported hash algorithm: {name}")]
    UnsupportedAlgorithm { name: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The temporary staging area could not be created or written.
    #[error("Staging area unavailable at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// The worker pool could not be started.
    #[error("Failed to start worker pool: {message}")]
    ThreadPool { message: String },
}

impl CatalogError {
    /// Create a staging error with path context.
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from a caller cancelling the run.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Category of a recoverable per-entry failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// File or archive entry could not be read.
    ReadError,
    /// Archive signature is corrupt or not recognized.
    ArchiveOpenError,
    /// Archive subtree was truncated by the entry budget.
    BudgetExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadError => write!(f, "ReadError"),
            Self::ArchiveOpenError => write!(f, "ArchiveOpenError"),
            Self::BudgetExceeded => write!(f, "BudgetExceeded"),
        }
    }
}

/// The step that was being performed when an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Read,
    Extract,
    Hash,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Read => write!(f, "read"),
            Self::Extract => write!(f, "extract"),
            Self::Hash => write!(f, "hash"),
        }
    }
}

/// A recoverable failure attached to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Filesystem path or archive-entry path that failed.
    pub path: PathBuf,
    /// Step that failed.
    pub operation: Operation,
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl ErrorRecord {
    /// Create a new error record.
    pub fn new(
        path: impl Into<PathBuf>,
        operation: Operation,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Create a read error from an I/O failure.
    pub fn read(path: impl Into<PathBuf>, operation: Operation, error: &std::io::Error) -> Self {
        let message = match error.kind() {
            std::io::ErrorKind::PermissionDenied => format!("Permission denied: {error}"),
            std::io::ErrorKind::NotFound => format!("Not found: {error}"),
            _ => format!("Read error: {error}"),
        };
        Self::new(path, operation, ErrorKind::ReadError, message)
    }

    /// Create an archive-open error.
    pub fn archive_open(path: impl Into<PathBuf>, cause: impl fmt::Display) -> Self {
        Self::new(
            path,
            Operation::Open,
            ErrorKind::ArchiveOpenError,
            format!("Not a readable zip archive: {cause}"),
        )
    }

    /// Create a budget-exceeded error for a truncated archive.
    pub fn budget_exceeded(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self::new(
            path,
            Operation::Extract,
            ErrorKind::BudgetExceeded,
            format!("Archive not fully processed: more than {cap} entries expanded"),
        )
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}]: {}",
            self.path.display(),
            self.kind,
            self.operation,
            self.message
        )
    }
}
