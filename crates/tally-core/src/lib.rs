//! Core types for tally.
//!
//! This crate provides the data model shared by the cataloging engine and
//! its front ends: file records, container nodes, error records, the
//! [`Catalog`] aggregate and the [`CatalogAccumulator`] that builds it, plus
//! run configuration.

mod algorithm;
mod catalog;
mod config;
mod error;
mod record;

pub use algorithm::HashAlgorithm;
pub use catalog::{Catalog, CatalogAccumulator, CatalogStats, DuplicateGroup, EmptyContainer};
pub use config::{CatalogConfig, CatalogConfigBuilder, DEFAULT_ARCHIVE_ENTRY_BUDGET};
pub use error::{CatalogError, ErrorKind, ErrorRecord, Operation};
pub use record::{CatalogUnit, ContainerKind, ContainerNode, FileRecord, HashKey, RecordOrigin};
