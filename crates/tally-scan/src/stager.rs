//! Archive entry admission and staging.
//!
//! Every archive entry is admitted against its chain's allowance, but only
//! nested archives are staged: `zip` needs a seekable source to open them.
//! Regular members are hashed straight from the decompressor, which keeps
//! the same bounded buffer without a round trip through disk.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::budget::{ArchiveAllowance, BudgetExceeded};

/// Prefix of every staged temp file.
pub const STAGE_PREFIX: &str = ".tally-stage-";

const STAGE_CHUNK_SIZE: usize = 64 * 1024;

/// Errors while staging one archive entry.
#[derive(Debug, Error)]
pub enum StageError {
    /// The entry's bytes could not be read from the archive.
    #[error("Failed to read archive entry: {0}")]
    Read(#[source] io::Error),

    /// The staging area could not be created or written.
    #[error("Failed to write staging file in {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Staging was stopped by cancellation.
    #[error("Staging cancelled")]
    Cancelled,
}

/// An archive entry copied to a temp file.
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedEntry {
    file: NamedTempFile,
    bytes: u64,
}

impl StagedEntry {
    /// Location of the staged copy.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of bytes staged.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// Check if nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Open an independent read handle positioned at the start.
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

/// Admits archive entries against a budget and spills nested archives to disk.
#[derive(Debug, Clone, Default)]
pub struct ArchiveStager {
    dir: Option<PathBuf>,
    cancel: Option<CancellationToken>,
}

impl ArchiveStager {
    /// Create a stager writing into `dir`, or the system temp dir if `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir, cancel: None }
    }

    /// Stop between chunks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Directory staged files are written to.
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Claim one entry from the archive chain's allowance.
    pub fn admit(&self, allowance: &ArchiveAllowance) -> Result<(), BudgetExceeded> {
        allowance.try_claim()
    }

    /// Copy `reader` into a fresh temp file.
    pub fn stage<R: Read>(&self, mut reader: R, entry_name: &str) -> Result<StagedEntry, StageError> {
        let dir = self.staging_dir();
        let storage = |source| StageError::Storage {
            path: dir.clone(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(STAGE_PREFIX)
            .tempfile_in(&dir)
            .map_err(storage)?;

        let mut buffer = vec![0u8; STAGE_CHUNK_SIZE];
        let mut bytes: u64 = 0;
        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(StageError::Cancelled);
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StageError::Read(e)),
            };
            file.write_all(&buffer[..read]).map_err(storage)?;
            bytes += read as u64;
        }
        file.flush().map_err(storage)?;

        debug!(entry = entry_name, bytes, path = %file.path().display(), "staged archive entry");
        Ok(StagedEntry { file, bytes })
    }
}
