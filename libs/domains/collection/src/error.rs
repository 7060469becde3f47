//! Error types for collection jobs.
//!
//! The taxonomy separates transient failures (worth another attempt) from
//! permanent ones (surface immediately). Cancellation and deadline expiry
//! are always permanent: once the job context is gone, no retry may start.

use thiserror::Error;
use worker_pool::{JobContext, PoolError};

/// Errors that can occur while running a collection job.
#[derive(Error, Debug)]
pub enum CollectError {
    /// Malformed request, template or graph.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Graph template could not be loaded or parsed.
    #[error("template error: {0}")]
    Template(String),

    /// TCP/SSH dial failed (timeout, refused, unreachable).
    #[error("ssh dial failed: {0}")]
    Dial(String),

    /// Authentication was rejected by the remote host.
    #[error("ssh authentication failed: {0}")]
    Auth(String),

    /// The circuit breaker is open; the socket was not touched.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// Session/channel-level failure on an established connection.
    #[error("ssh session error: {0}")]
    Session(String),

    /// Protocol-level rejection (channel refused, malformed exec request).
    #[error("ssh protocol error: {0}")]
    Protocol(String),

    /// The script ran and exited non-zero.
    #[error("script exited with status {status}")]
    ScriptExit { status: u32 },

    /// Reading stdout/stderr failed mid-stream.
    #[error("stream read error: {0}")]
    Stream(String),

    /// A post-processor failed on the captured output.
    #[error("post-processor '{name}' failed: {message}")]
    Processor { name: String, message: String },

    /// A post-process declaration names an unregistered processor.
    #[error("unknown post-processor: {0}")]
    UnknownProcessor(String),

    /// The job context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The job deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The document store rejected the result.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Invariant violation inside the pipeline.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollectError {
    /// Categorize for retry decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            // Another attempt may succeed: the connection can recover, the
            // breaker can close, the script can pass on a healthy session.
            Self::Dial(_)
            | Self::BreakerOpen
            | Self::Session(_)
            | Self::ScriptExit { .. }
            | Self::Stream(_)
            | Self::Processor { .. } => ErrorCategory::Transient,

            Self::Validation(_)
            | Self::Template(_)
            | Self::Auth(_)
            | Self::Protocol(_)
            | Self::UnknownProcessor(_)
            | Self::Cancelled
            | Self::DeadlineExceeded
            | Self::Persistence(_)
            | Self::Internal(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// The cancellation error matching the context's current state.
    pub fn from_cancelled_ctx(ctx: &JobContext) -> Self {
        if ctx.deadline_exceeded() {
            Self::DeadlineExceeded
        } else {
            Self::Cancelled
        }
    }
}

/// Error category for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary error - retry with backoff.
    Transient,

    /// Do not retry.
    Permanent,
}

impl From<serde_json::Error> for CollectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<CollectError> for PoolError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Cancelled => PoolError::Cancelled,
            CollectError::DeadlineExceeded => PoolError::DeadlineExceeded,
            other => PoolError::Job(other.to_string()),
        }
    }
}
