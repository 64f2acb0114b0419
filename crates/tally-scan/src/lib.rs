//! Cataloging engine for tally.
//!
//! This crate walks selected roots (files, directories and zip archives,
//! including zips nested inside zips) and folds what it finds into a
//! [`Catalog`].
//!
//! # Overview
//!
//! - **Traversal** via jwalk in sorted, depth-first order
//! - **Streaming hashes** with a fixed 64 KiB buffer
//! - **Archive budget** bounding how many entries one archive chain may expand
//! - **Staging** of nested archives to self-deleting temp files
//! - **Progress updates** via broadcast channels
//!
//! # Example
//!
//! ```rust,no_run
//! use tally_scan::{CatalogConfig, Cataloger};
//!
//! let config = CatalogConfig::new(["/path/to/evidence"]);
//! let catalog = Cataloger::new().catalog(&config).unwrap();
//!
//! println!("Files: {}", catalog.files().len());
//! for group in catalog.duplicate_groups() {
//!     println!("{} x{}", group.key, group.count());
//! }
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! use tally_scan::{CatalogConfig, Cataloger};
//!
//! let cataloger = Cataloger::new();
//! let mut progress_rx = cataloger.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(progress) = progress_rx.blocking_recv() {
//!         println!("Hashed {} files", progress.files_processed);
//!     }
//! });
//!
//! let catalog = cataloger.catalog(&CatalogConfig::new(["."])).unwrap();
//! ```

mod budget;
mod engine;
mod hasher;
mod progress;
mod stager;
mod traverser;

pub use budget::{ArchiveAllowance, ArchiveBudget, BudgetExceeded};
pub use engine::Cataloger;
pub use hasher::{Digested, HASH_CHUNK_SIZE, HashError, StreamHasher};
pub use progress::{CatalogProgress, PROGRESS_INTERVAL};
pub use stager::{ArchiveStager, STAGE_PREFIX, StageError, StagedEntry};
pub use traverser::{TraverseContext, Traverser};

// Re-export core types for convenience
pub use tally_core::{
    Catalog, CatalogConfig, CatalogError, CatalogUnit, ContainerKind, ContainerNode,
    DuplicateGroup, EmptyContainer, ErrorKind, ErrorRecord, FileRecord, HashAlgorithm, HashKey,
    Operation, RecordOrigin,
};
