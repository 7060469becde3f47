//! Metrics module for bus and job observability.
//!
//! Prometheus-compatible metrics:
//!
//! - `bus_messages_published_total` - Counter of published messages
//! - `bus_publish_retries_total` - Counter of transient publish retries
//! - `bus_messages_consumed_total` - Counter of decoded+committed messages
//! - `bus_decode_failures_total` - Counter of undecodable messages
//! - `collection_jobs_total` - Counter of collection jobs by outcome
//! - `collection_active_workers` - Gauge of jobs currently executing

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency
pub mod names {
    pub const PUBLISHED: &str = "bus_messages_published_total";
    pub const PUBLISH_RETRIES: &str = "bus_publish_retries_total";
    pub const CONSUMED: &str = "bus_messages_consumed_total";
    pub const DECODE_FAILURES: &str = "bus_decode_failures_total";
    pub const JOBS: &str = "collection_jobs_total";
    pub const ACTIVE_WORKERS: &str = "collection_active_workers";
}

/// Job outcome for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum JobOutcome {
    Success,
    Failed,
    Cancelled,
    Rejected,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// Call once at application startup; returns the handle for rendering.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Get the global Prometheus handle, if initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub fn record_published(stream: &str) {
    counter!(names::PUBLISHED, "stream" => stream.to_string()).increment(1);
}

pub fn record_publish_retry(stream: &str) {
    counter!(names::PUBLISH_RETRIES, "stream" => stream.to_string()).increment(1);
}

pub fn record_consumed(stream: &str) {
    counter!(names::CONSUMED, "stream" => stream.to_string()).increment(1);
}

pub fn record_decode_failure(stream: &str) {
    counter!(names::DECODE_FAILURES, "stream" => stream.to_string()).increment(1);
}

pub fn record_job(stream: &str, outcome: JobOutcome) {
    counter!(
        names::JOBS,
        "stream" => stream.to_string(),
        "outcome" => outcome.as_str().to_string()
    )
    .increment(1);
}

pub fn set_active_workers(stream: &str, count: f64) {
    gauge!(names::ACTIVE_WORKERS, "stream" => stream.to_string()).set(count);
}
