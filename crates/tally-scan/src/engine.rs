//! Run driver: validates the configuration, walks every root and folds the
//! results into one catalog.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tally_core::{Catalog, CatalogAccumulator, CatalogConfig, CatalogError, CatalogUnit};

use crate::progress::{CatalogProgress, ProgressTracker};
use crate::traverser::{TraverseContext, Traverser};

/// Builds catalogs from a [`CatalogConfig`].
pub struct Cataloger {
    progress_tx: broadcast::Sender<CatalogProgress>,
    cancel: CancellationToken,
}

impl Cataloger {
    /// Create a new cataloger.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            progress_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogProgress> {
        self.progress_tx.subscribe()
    }

    /// Token that stops every run of this cataloger when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Catalog every root in `config`.
    ///
    /// Per-entry failures end up in [`Catalog::errors`]; only configuration,
    /// staging and cancellation failures return `Err`.
    pub fn catalog(&self, config: &CatalogConfig) -> Result<Catalog, CatalogError> {
        config.validate()?;
        let start = Instant::now();
        let roots = config.unique_roots();
        let run_token = self.cancel.child_token();
        let sequential = config.threads == 1;
        let ctx = TraverseContext::new(config, run_token.clone()).with_serial_walk(!sequential);
        let tracker = ProgressTracker::new();
        let mut accumulator = CatalogAccumulator::for_config(config);

        debug!(roots = roots.len(), algorithm = %config.hash_algorithm, sequential, "catalog started");

        if sequential {
            for root in &roots {
                for item in Traverser::new(&ctx, root) {
                    let unit = item?;
                    self.observe(&tracker, &unit);
                    accumulator.push(unit);
                }
            }
        } else {
            for units in self.collect_parallel(&ctx, &roots, config.threads, &tracker, &run_token)? {
                accumulator.extend(units);
            }
        }

        let last = roots.last().map(|r| r.as_path()).unwrap_or(Path::new(""));
        let _ = self.progress_tx.send(tracker.snapshot(last));

        let catalog = accumulator.finish();
        info!(
            files = catalog.stats().total_files,
            bytes = catalog.stats().total_bytes,
            duplicate_groups = catalog.duplicate_groups().len(),
            errors = catalog.errors().len(),
            truncated_archives = ctx.budget().truncations(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "catalog finished"
        );
        Ok(catalog)
    }

    /// Walk roots on a rayon pool, keeping the results in root order.
    fn collect_parallel(
        &self,
        ctx: &TraverseContext,
        roots: &[PathBuf],
        threads: usize,
        tracker: &ProgressTracker,
        token: &CancellationToken,
    ) -> Result<Vec<Vec<CatalogUnit>>, CatalogError> {
        let walk = || {
            roots
                .par_iter()
                .map(|root| self.walk_root(ctx, root, tracker, token))
                .collect::<Vec<_>>()
        };
        let results = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| CatalogError::ThreadPool {
                    message: e.to_string(),
                })?;
            pool.install(walk)
        } else {
            walk()
        };

        // Report the failure that stopped the run, not the cancellations it
        // caused in sibling roots.
        let mut cancelled = false;
        let mut collected = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(units) => collected.push(units),
                Err(e) if e.is_cancelled() => cancelled = true,
                Err(e) => return Err(e),
            }
        }
        if cancelled {
            return Err(CatalogError::Cancelled);
        }
        Ok(collected)
    }

    fn walk_root(
        &self,
        ctx: &TraverseContext,
        root: &Path,
        tracker: &ProgressTracker,
        token: &CancellationToken,
    ) -> Result<Vec<CatalogUnit>, CatalogError> {
        let mut units = Vec::new();
        for item in Traverser::new(ctx, root) {
            match item {
                Ok(unit) => {
                    self.observe(tracker, &unit);
                    units.push(unit);
                }
                Err(e) => {
                    if !e.is_cancelled() {
                        token.cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(units)
    }

    fn observe(&self, tracker: &ProgressTracker, unit: &CatalogUnit) {
        match unit {
            CatalogUnit::File(record) => {
                if let Some(progress) = tracker.record_file(&record.path, record.size) {
                    let _ = self.progress_tx.send(progress);
                }
            }
            CatalogUnit::Error(error) => {
                tracker.record_error();
                warn!(
                    path = %error.path.display(),
                    kind = %error.kind,
                    operation = %error.operation,
                    "{}",
                    error.message
                );
            }
            CatalogUnit::Container(node) if node.empty => {
                debug!(path = %node.path.display(), kind = %node.kind, "empty container");
            }
            CatalogUnit::Container(_) => {}
        }
    }
}

impl Default for Cataloger {
    fn default() -> Self {
        Self::new()
    }
}
