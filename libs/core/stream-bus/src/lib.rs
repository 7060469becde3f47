//! Stream Bus - Redis Streams transport between intake and collectors
//!
//! A thin bus layer with the semantics the pipeline relies on:
//! - **Producer**: one message per request, keyed by execution id, with
//!   bounded retries on transient errors (exponential backoff + jitter)
//! - **Consumer**: consumer-group subscription, commit-after-decode
//!   (at-least-once), pending-message claim on startup, graceful close
//! - **Registry**: type-safe stream definitions (`StreamDef`)
//! - **Metrics**: Prometheus counters/gauges for published/consumed/job
//!   outcomes
//!
//! # Architecture
//!
//! ```text
//! intake API ── BusProducer::publish ──▶ Redis Stream (harvest:requests)
//!                                              │ (consumer group)
//! collector ◀── BusConsumer::read  ◀───────────┘
//! ```

mod config;
mod connect;
mod consumer;
mod error;
pub mod metrics;
mod producer;
mod registry;

pub use config::BusConfig;
pub use connect::{connect, connect_with_retry};
pub use consumer::{BusConsumer, Delivery};
pub use error::{BusError, ErrorCategory};
pub use producer::BusProducer;
pub use registry::StreamDef;

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;
