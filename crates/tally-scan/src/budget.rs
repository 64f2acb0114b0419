//! Per-run archive expansion budget.
//!
//! A run owns one [`ArchiveBudget`]. Every archive reached from the
//! filesystem opens a new [`ArchiveAllowance`]; archives nested inside it
//! share that allowance, so the cap bounds the whole chain and not just one
//! level of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Returned when an archive chain has used up its allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExceeded {
    /// Cap that was reached.
    pub cap: usize,
}

/// Run-scoped archive budget.
#[derive(Debug)]
pub struct ArchiveBudget {
    cap: usize,
    chains: AtomicU64,
    truncated: AtomicU64,
}

impl ArchiveBudget {
    /// Create a budget allowing `cap` entries per archive chain.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            chains: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
        }
    }

    /// Cap per archive chain.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Start a fresh allowance for an archive found on the filesystem.
    pub fn open_chain(self: &Arc<Self>) -> Arc<ArchiveAllowance> {
        self.chains.fetch_add(1, Ordering::Relaxed);
        Arc::new(ArchiveAllowance {
            budget: Arc::clone(self),
            used: AtomicUsize::new(0),
        })
    }

    /// Number of archive chains opened so far.
    pub fn chains_opened(&self) -> u64 {
        self.chains.load(Ordering::Relaxed)
    }

    /// Number of archives truncated by the cap so far.
    pub fn truncations(&self) -> u64 {
        self.truncated.load(Ordering::Relaxed)
    }
}

/// Entry counter shared by one archive and everything nested in it.
#[derive(Debug)]
pub struct ArchiveAllowance {
    budget: Arc<ArchiveBudget>,
    used: AtomicUsize,
}

impl ArchiveAllowance {
    /// Claim one entry.
    ///
    /// The check and the increment are a single atomic step, so two
    /// concurrent claims can never both take the last slot.
    pub fn try_claim(&self) -> Result<(), BudgetExceeded> {
        let cap = self.budget.cap;
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < cap).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                self.budget.truncated.fetch_add(1, Ordering::Relaxed);
                BudgetExceeded { cap }
            })
    }

    /// Entries claimed so far.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Entries still available.
    pub fn remaining(&self) -> usize {
        self.budget.cap.saturating_sub(self.used())
    }
}
