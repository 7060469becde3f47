//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the pool and by job handlers.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been stopped; the job was rejected.
    #[error("worker pool is shutting down, job rejected")]
    ShuttingDown,

    /// The job context was cancelled between or during attempts.
    #[error("job cancelled")]
    Cancelled,

    /// The job context deadline passed.
    #[error("job deadline exceeded")]
    DeadlineExceeded,

    /// Handler-reported job failure (retried up to the attempt budget).
    #[error("job failed: {0}")]
    Job(String),

    /// All attempts were spent without success.
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl PoolError {
    /// True for failures caused by cancellation rather than the job itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
