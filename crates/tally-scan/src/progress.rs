//! Catalog progress reporting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Files between two progress updates.
pub const PROGRESS_INTERVAL: u64 = 100;

/// Progress information during a run.
#[derive(Debug, Clone)]
pub struct CatalogProgress {
    /// Number of files hashed so far.
    pub files_processed: u64,
    /// Total bytes hashed so far.
    pub bytes_processed: u64,
    /// Number of error records so far.
    pub errors_count: u64,
    /// Path most recently cataloged.
    pub current_path: PathBuf,
    /// Time elapsed since the run started.
    pub elapsed: Duration,
}

impl CatalogProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self {
            files_processed: 0,
            bytes_processed: 0,
            errors_count: 0,
            current_path: PathBuf::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Calculate rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_processed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Calculate rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.bytes_processed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

impl Default for CatalogProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe counters behind [`CatalogProgress`] snapshots.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Instant,
    files: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Count a file; returns a snapshot when an update is due.
    pub fn record_file(&self, path: &Path, size: u64) -> Option<CatalogProgress> {
        self.bytes.fetch_add(size, Ordering::Relaxed);
        let count = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        (count % PROGRESS_INTERVAL == 0).then(|| self.snapshot(path))
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, current_path: &Path) -> CatalogProgress {
        CatalogProgress {
            files_processed: self.files.load(Ordering::Relaxed),
            bytes_processed: self.bytes.load(Ordering::Relaxed),
            errors_count: self.errors.load(Ordering::Relaxed),
            current_path: current_path.to_path_buf(),
            elapsed: self.start_time.elapsed(),
        }
    }
}
