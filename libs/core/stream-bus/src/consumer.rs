//! Redis stream consumer implementation.
//!
//! Consumer-group reader with at-least-once delivery: a message is
//! acknowledged immediately after it decodes into the typed payload, so a
//! collector crash before decode leaves the entry pending and it is
//! re-claimed on the next startup. Handler failures after decode are not
//! the bus's concern; idempotent persistence absorbs reprocessing.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::metrics;
use crate::BusResult;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use worker_pool::JobContext;

/// A decoded, committed delivery.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    /// Redis stream entry ID (e.g., "1234567890123-0").
    pub message_id: String,
    /// Partition/correlation key the producer attached.
    pub key: Option<String>,
    /// The typed payload.
    pub payload: T,
}

/// Group-subscribed stream consumer.
pub struct BusConsumer<T> {
    redis: ConnectionManager,
    config: BusConfig,
    closed: AtomicBool,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> BusConsumer<T> {
    /// Create a new consumer.
    pub fn new(redis: ConnectionManager, config: BusConfig) -> Self {
        Self {
            redis,
            config,
            closed: AtomicBool::new(false),
            _payload: PhantomData,
        }
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Ensure the consumer group exists (stream auto-created with MKSTREAM).
    pub async fn ensure_group(&self) -> BusResult<()> {
        let mut conn = self.redis.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!("Created consumer group '{}'", self.config.consumer_group);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    "Consumer group '{}' already exists",
                    self.config.consumer_group
                );
                Ok(())
            }
            Err(e) => Err(BusError::Group(e.to_string())),
        }
    }

    /// Claim every pending entry of the group on startup.
    ///
    /// Deliveries that were fetched but never acknowledged (collector crashed
    /// before decode) come back here, which is what makes the pipeline
    /// at-least-once across restarts.
    pub async fn claim_pending_on_startup(&self) -> BusResult<usize> {
        let mut conn = self.redis.clone();
        let mut total_claimed = 0;
        let mut start_id = "0-0".to_string();

        loop {
            let result: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_id)
                .arg(0) // min-idle-time = 0 claims everything
                .arg(&start_id)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            // Response shape: [next-start-id, [[msg-id, fields], ...], [deleted-ids]]
            let redis::Value::Array(arr) = &result else {
                break;
            };
            if arr.len() < 2 {
                break;
            }

            match &arr[0] {
                redis::Value::BulkString(next_id) => {
                    let next = String::from_utf8_lossy(next_id).to_string();
                    if next == "0-0" {
                        if let redis::Value::Array(messages) = &arr[1] {
                            total_claimed += messages.len();
                        }
                        break;
                    }
                    start_id = next;
                }
                _ => break,
            }

            match &arr[1] {
                redis::Value::Array(messages) if !messages.is_empty() => {
                    total_claimed += messages.len();
                }
                _ => break,
            }
        }

        if total_claimed > 0 {
            info!(
                count = total_claimed,
                consumer = %self.config.consumer_id,
                "Claimed pending messages on startup"
            );
        }

        Ok(total_claimed)
    }

    /// Fetch the next message, decode it, and commit the offset.
    ///
    /// Blocks (in `block_timeout_ms` slices, re-checking the context between
    /// slices) until a message arrives, the context is cancelled, or the
    /// consumer is closed. A decode failure is returned **without** an ack so
    /// the entry stays pending; the caller is expected to sleep briefly
    /// before the next `read`.
    pub async fn read(&self, ctx: &JobContext) -> BusResult<Delivery<T>> {
        loop {
            if self.closed.load(Ordering::SeqCst) || ctx.is_cancelled() {
                return Err(BusError::Closed);
            }

            let Some((message_id, fields)) = self.fetch_one().await? else {
                continue; // BLOCK timeout, no messages
            };

            let key = fields.get("key").cloned();
            let raw = fields.get("payload").ok_or_else(|| {
                BusError::Decode(format!(
                    "message {} is missing the 'payload' field",
                    message_id
                ))
            })?;

            let payload: T = serde_json::from_str(raw).map_err(|e| {
                metrics::record_decode_failure(&self.config.stream_name);
                BusError::Decode(format!("message {}: {}", message_id, e))
            })?;

            // Commit after decode: the store's idempotent upsert covers
            // reprocessing of handler failures past this point.
            self.ack(&message_id).await?;
            metrics::record_consumed(&self.config.stream_name);

            debug!(
                message_id = %message_id,
                key = ?key,
                "Message decoded and committed"
            );
            return Ok(Delivery {
                message_id,
                key,
                payload,
            });
        }
    }

    /// Stop the consumer; subsequent and in-flight `read` calls return
    /// `BusError::Closed`. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(
                consumer = %self.config.consumer_id,
                "Bus consumer closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// One XREADGROUP round; `None` on BLOCK timeout.
    async fn fetch_one(&self) -> BusResult<Option<(String, HashMap<String, String>)>> {
        let mut conn = self.redis.clone();

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size)
            .block(self.config.block_timeout_ms as usize);

        let result: Result<StreamReadReply, _> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                // A BLOCK timeout surfaces either as a timeout or as a nil
                // reply that fails type conversion; neither is an error.
                let err_str = e.to_string().to_lowercase();
                let bus_err = BusError::Redis(e);
                if bus_err.is_block_timeout()
                    || err_str.contains("nil")
                    || (err_str.contains("response") && err_str.contains("type"))
                {
                    return Ok(None);
                }
                if bus_err.is_nogroup_error() {
                    warn!("Consumer group missing, recreating");
                    self.ensure_group().await?;
                    return Ok(None);
                }
                return Err(bus_err);
            }
        };

        for stream_key in reply.keys {
            if let Some(message) = stream_key.ids.into_iter().next() {
                let mut fields = HashMap::new();
                for (name, value) in message.map {
                    let text = match value {
                        redis::Value::BulkString(bytes) => {
                            String::from_utf8_lossy(&bytes).to_string()
                        }
                        redis::Value::SimpleString(s) => s,
                        other => format!("{:?}", other),
                    };
                    fields.insert(name, text);
                }
                return Ok(Some((message.id, fields)));
            }
        }

        Ok(None)
    }

    async fn ack(&self, message_id: &str) -> BusResult<()> {
        let mut conn = self.redis.clone();

        let _: () = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[message_id],
            )
            .await?;

        debug!(message_id = %message_id, "Acknowledged message");
        Ok(())
    }
}
