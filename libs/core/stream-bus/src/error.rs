//! Error types for bus operations.
//!
//! This module provides:
//! - `BusError` - The main error type for producer/consumer operations
//! - `ErrorCategory` - Transient/permanent classification driving retries

use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug)]
pub enum BusError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization error on the producer side.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message payload could not be decoded into the typed request.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Consumer group operation failed.
    #[error("Consumer group error: {0}")]
    Group(String),

    /// Transient failures were exhausted or the stream does not exist.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// The consumer was closed or its context cancelled.
    #[error("Bus closed")]
    Closed,

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl BusError {
    /// Check if this is a BLOCK timeout (no messages arrived, not an error).
    pub fn is_block_timeout(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("timed out") && !err_str.contains("connection")
            }
            _ => false,
        }
    }

    /// Check if this is a consumer group missing error (NOGROUP).
    pub fn is_nogroup_error(&self) -> bool {
        match self {
            Self::Redis(e) => e.to_string().contains("NOGROUP"),
            Self::Group(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }

    /// Categorize the error for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                if err_str.contains("connection")
                    || err_str.contains("disconnected")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("eof")
                    || err_str.contains("io error")
                    || err_str.contains("timeout")
                    || err_str.contains("timed out")
                    || err_str.contains("busy")
                    || err_str.contains("loading")
                {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }

            Self::Timeout(_) => ErrorCategory::Transient,

            // Group errors can be repaired by recreating the group.
            Self::Group(_) => ErrorCategory::Transient,

            Self::Unavailable(_) => ErrorCategory::Transient,

            // Bad data or closed bus: retrying cannot help.
            Self::Serialization(_) => ErrorCategory::Permanent,
            Self::Decode(_) => ErrorCategory::Permanent,
            Self::Closed => ErrorCategory::Permanent,
        }
    }

    /// Check if the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error category for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary error - retry with backoff.
    Transient,

    /// Permanent error - surface immediately, do not retry.
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::Decode("missing payload field".to_string());
        assert_eq!(err.to_string(), "Decode error: missing payload field");
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = BusError::Timeout("publish deadline".to_string());
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_transient());
    }

    #[test]
    fn test_group_error_is_transient() {
        let err = BusError::Group("NOGROUP No such consumer group".to_string());
        assert!(err.is_nogroup_error());
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_decode_is_permanent() {
        let err = BusError::Decode("invalid json".to_string());
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_closed_is_permanent() {
        assert_eq!(BusError::Closed.category(), ErrorCategory::Permanent);
    }
}
