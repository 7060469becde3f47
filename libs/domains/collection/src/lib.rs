//! Collection domain: everything needed to run one data-collection job.
//!
//! A job takes a declarative graph of shell scripts, executes the leaves
//! over a resilient SSH connection, post-processes each leaf's output and
//! returns the populated graph for persistence.
//!
//! # Architecture
//!
//! ```text
//! CollectJob (host, script, execution id)
//!   ↓
//! JobRunner ── loads GraphTemplate, dials SshTransport
//!   ↓ (N traversal workers over the lazy node sequence)
//! NodeExecutor ── retry/backoff per node, breaker-gated sessions
//!   ↓
//! ProcessorChain ── trim / split_lines / key_value / key_value_json
//!   ↓
//! Graph (per-node results, written exactly once) ──▶ document store
//! ```

pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod processor;
pub mod resilience;
pub mod runner;
pub mod streams;
pub mod transport;

pub use error::{CollectError, ErrorCategory};
pub use executor::NodeExecutor;
pub use graph::{Graph, GraphTemplate, Node, NodeId, NodeOutput, NodeSequence, NodeType};
pub use models::{CollectRequest, HostConfig, TransportConfig};
pub use processor::{PostProcessor, ProcessorChain};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use runner::{CollectJob, JobRunner, RunnerConfig, DEFAULT_TRAVERSAL_WORKERS};
pub use streams::CollectRequestStream;
pub use transport::{ScriptOutput, ScriptRunner, SshTransport};

/// Result type alias for collection operations.
pub type CollectResult<T> = Result<T, CollectError>;
