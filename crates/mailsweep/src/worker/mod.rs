//! Claim-process-advance workers.
//!
//! A [`Task`] performs one step of work against the shared store: reserve
//! quota, claim one record, call the mailbox, record the outcome. The
//! [`WorkerPool`] runs the same task on several threads until every
//! thread has seen the queue drained.

pub mod delete;
pub mod fetch;
pub mod pool;

pub use delete::DeleteTask;
pub use fetch::FetchTask;
pub use pool::{ErrorPolicy, PoolReport, WorkerFailure, WorkerPool};

use crate::error::WorkerError;

/// Result of a single successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One record was claimed and handled.
    Processed,
    /// The source partition had nothing left to claim.
    Drained,
}

/// A unit of work repeated by every thread of a pool.
pub trait Task: Send + Sync {
    /// Short name used in logs and spans.
    fn name(&self) -> &'static str;

    fn step(&self) -> Result<Step, WorkerError>;
}
