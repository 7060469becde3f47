//! Consumer configuration
//!
//! This module provides `BusConfig` for configuring the bus consumer.

use crate::registry::StreamDef;
use uuid::Uuid;

/// Configuration for a bus consumer
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis stream name
    pub stream_name: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Blocking read timeout in milliseconds
    pub block_timeout_ms: u64,

    /// Batch size for reading messages
    pub batch_size: usize,
}

impl BusConfig {
    /// Create a config from a `StreamDef`
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_group: S::CONSUMER_GROUP.to_string(),
            consumer_id: format!("collector-{}", Uuid::new_v4()),
            block_timeout_ms: S::BLOCK_TIMEOUT_MS,
            batch_size: 1,
        }
    }

    /// Create a config with explicit stream and group names
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_group: consumer_group.into(),
            consumer_id: format!("collector-{}", Uuid::new_v4()),
            block_timeout_ms: 5_000,
            batch_size: 1,
        }
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the blocking read timeout
    pub fn with_block_timeout_ms(mut self, timeout: u64) -> Self {
        self.block_timeout_ms = timeout;
        self
    }

    /// Set the read batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}
