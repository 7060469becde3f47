//! Redis stream producer for queueing collection requests.
//!
//! One `publish` call results in at most one message on the stream:
//! retries only re-issue the XADD after a failed attempt, never after a
//! successful one.

use crate::error::BusError;
use crate::metrics;
use crate::registry::StreamDef;
use crate::BusResult;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum XADD attempts per publish.
const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// First retry delay; doubles per attempt up to [`MAX_RETRY_DELAY_MS`].
const BASE_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 800;

/// Additive jitter range: 0..=74ms.
const JITTER_RANGE_MS: u64 = 75;

/// Redis stream producer.
///
/// Used by the intake API to enqueue requests for background collection.
///
/// # Example
///
/// ```rust,ignore
/// let producer = BusProducer::from_stream_def::<CollectRequestStream>(redis);
/// let message_id = producer.publish(&request.exuid.to_string(), &request).await?;
/// ```
pub struct BusProducer {
    redis: ConnectionManager,
    stream_name: String,
    max_length: Option<i64>,
}

impl BusProducer {
    /// Create a new producer for the given stream.
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            max_length: None,
        }
    }

    /// Create a producer from a `StreamDef` implementation.
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self {
            redis,
            stream_name: S::STREAM_NAME.to_string(),
            max_length: Some(S::MAX_LENGTH),
        }
    }

    /// Set the maximum stream length (MAXLEN ~).
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Publish one message keyed by `key`, retrying transient failures.
    ///
    /// Returns the message ID assigned by Redis. Messages with the same key
    /// stay in one FIFO stream, so per-key ordering is preserved by the bus.
    pub async fn publish<P: Serialize>(&self, key: &str, payload: &P) -> BusResult<String> {
        let body = serde_json::to_string(payload)?;

        let mut last: Option<BusError> = None;
        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            match self.xadd(key, &body).await {
                Ok(message_id) => {
                    debug!(
                        stream = %self.stream_name,
                        message_id = %message_id,
                        key = %key,
                        "Published request to stream"
                    );
                    metrics::record_published(&self.stream_name);
                    return Ok(message_id);
                }
                Err(e) if e.is_transient() && attempt < MAX_PUBLISH_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    warn!(
                        stream = %self.stream_name,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Transient publish failure, backing off"
                    );
                    metrics::record_publish_retry(&self.stream_name);
                    last = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    // Budget spent on a transient error: the bus is
                    // unavailable as far as this request is concerned.
                    return Err(BusError::Unavailable(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        Err(BusError::Unavailable(
            last.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn xadd(&self, key: &str, body: &str) -> BusResult<String> {
        let mut conn = self.redis.clone();

        let message_id: String = if let Some(max_len) = self.max_length {
            // MAXLEN ~ for approximate trimming (cheaper than exact)
            redis::cmd("XADD")
                .arg(&self.stream_name)
                .arg("MAXLEN")
                .arg("~")
                .arg(max_len)
                .arg("*")
                .arg("key")
                .arg(key)
                .arg("payload")
                .arg(body)
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("XADD")
                .arg(&self.stream_name)
                .arg("*")
                .arg("key")
                .arg(key)
                .arg("payload")
                .arg(body)
                .query_async(&mut conn)
                .await?
        };

        Ok(message_id)
    }
}

impl Clone for BusProducer {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            stream_name: self.stream_name.clone(),
            max_length: self.max_length,
        }
    }
}

/// Delay before retry number `attempt + 1`: exponential with additive jitter.
fn retry_delay(attempt: u32) -> Duration {
    let exp = BASE_RETRY_DELAY_MS.saturating_mul(2u64.pow(attempt - 1));
    let capped = exp.min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(capped + jitter_ms(JITTER_RANGE_MS))
}

/// Pseudo-random jitter in `0..range` derived from the clock.
fn jitter_ms(range: u64) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::SystemTime;

    if range == 0 {
        return 0;
    }

    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    hasher.finish() % range
}
