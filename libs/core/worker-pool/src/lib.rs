//! Worker Pool - Generic Bounded Job Pool
//!
//! A reusable library for running jobs with:
//! - A bounded submission queue (backpressure on `submit`)
//! - One task per accepted job, active count tracked for observability
//! - Per-job retry with linear backoff
//! - Cooperative cancellation via `JobContext` (cancel signal + deadline)
//! - Unconditional per-job cleanup (runs exactly once after the final attempt)
//! - Graceful shutdown: `stop()` waits for in-flight jobs, then closes the queue
//!
//! # Architecture
//!
//! ```text
//! submit(Job<T>)
//!   ↓ (bounded mpsc queue)
//! dispatcher task
//!   ↓ (spawns one task per job)
//! JobHandler<T>::run  (≤ 3 attempts, attempt × 1s backoff)
//!   ↓ (always)
//! cleanup
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use worker_pool::{Job, JobContext, JobHandler, Pool};
//!
//! struct Collect;
//!
//! #[async_trait]
//! impl JobHandler<CollectRequest> for Collect {
//!     async fn run(&self, req: CollectRequest, ctx: &JobContext) -> Result<(), PoolError> {
//!         // run the job, observing ctx at every suspension point
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "collect" }
//! }
//!
//! let pool = Pool::new(Collect, 10);
//! let (handle, ctx) = JobContext::with_timeout(Duration::from_secs(60));
//! pool.submit(Job::new(request, ctx)).await?;
//! ```

mod context;
mod error;
mod pool;

pub use context::{CancelHandle, JobContext};
pub use error::PoolError;
pub use pool::{Job, JobHandler, Pool, DEFAULT_MAX_WORKERS, MAX_ATTEMPTS};

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
