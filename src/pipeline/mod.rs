//! Concurrent execution of the two pipeline phases.
//!
//! Both phases share the same shape: a set of independent row jobs
//! dispatched under a [`tokio::sync::Semaphore`] with a fixed worker
//! budget, failures contained at the job boundary, and shared atomic
//! counters feeding periodic progress logs. [`collect`] asks the bot and
//! persists transcript segments; [`assess`] scores persisted answers.

pub mod assess;
pub mod collect;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::{BotCallError, EvalError, StoreError};

pub use assess::AssessRunner;
pub use collect::CollectRunner;

/// Default worker budget for both phases.
pub const DEFAULT_WORKERS: usize = 5;

/// Anything that can fail one row job. The job boundary catches these,
/// logs them, and moves on; one bad row never aborts the run.
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Bot(#[from] BotCallError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Answer text is empty, nothing to score")]
    EmptyAnswer,
}

/// Outcome of one phase run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs dispatched.
    pub total: usize,
    /// Jobs that completed successfully.
    pub succeeded: usize,
    /// Jobs that failed after retries.
    pub failed: usize,
    /// Rows written or updated in the table.
    pub records: usize,
}

/// Shared live counters for one phase run.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    records: AtomicUsize,
}

impl ProgressCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self, records: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.records.fetch_add(records, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn summary(&self, total: usize) -> RunSummary {
        RunSummary {
            total,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            records: self.records.load(Ordering::SeqCst),
        }
    }
}

/// Start-of-job delay spreading worker ramp-up over three ticks, so a
/// burst of jobs does not hit the bot in the same instant.
pub fn stagger_delay(index: usize) -> Duration {
    Duration::from_secs(1 + (index % 3) as u64)
}
