//! The generic pool: bounded queue, dispatcher and per-job worker tasks.

use crate::context::JobContext;
use crate::error::PoolError;
use crate::PoolResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Queue capacity and spawn bound when none is given.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Attempt budget per job; delays are `attempt × 1s` between attempts.
pub const MAX_ATTEMPTS: u32 = 3;

/// Trait for job handlers.
///
/// The handler is shared by every worker task; per-job state travels in the
/// payload. Return an error to trigger a retry (cancellation errors are
/// never retried).
#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    /// Run a single attempt of the job.
    async fn run(&self, payload: T, ctx: &JobContext) -> PoolResult<()>;

    /// Get the handler name for logging.
    fn name(&self) -> &'static str;
}

/// A unit of work: payload + context + optional cleanup.
///
/// The cleanup closure runs exactly once after the final attempt of an
/// accepted job, whatever the outcome. Jobs rejected by `submit` never ran,
/// so their cleanup is not invoked; the submitter keeps ownership of any
/// external state in that case.
pub struct Job<T> {
    pub payload: T,
    pub ctx: JobContext,
    pub cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl<T> Job<T> {
    pub fn new(payload: T, ctx: JobContext) -> Self {
        Self {
            payload,
            ctx,
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

/// Bounded worker pool.
///
/// `submit` blocks while the queue is full and fails once `stop` has been
/// observed. The dispatcher launches one task per accepted job; the active
/// count is tracked atomically for observability.
pub struct Pool<T> {
    jobs: mpsc::Sender<Job<T>>,
    quit: watch::Sender<bool>,
    active: Arc<AtomicI32>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Pool<T> {
    /// Create a pool and start its dispatcher.
    pub fn new<H: JobHandler<T>>(handler: H, max_workers: usize) -> Self {
        let max_workers = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };

        let (jobs_tx, jobs_rx) = mpsc::channel(max_workers);
        let (quit_tx, quit_rx) = watch::channel(false);
        let active = Arc::new(AtomicI32::new(0));

        let dispatcher = tokio::spawn(dispatch(
            Arc::new(handler),
            jobs_rx,
            quit_rx,
            Arc::clone(&active),
        ));

        Self {
            jobs: jobs_tx,
            quit: quit_tx,
            active,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Submit a job, waiting for queue space.
    ///
    /// Returns `PoolError::ShuttingDown` once `stop` has been called; the
    /// rejected job is dropped.
    pub async fn submit(&self, job: Job<T>) -> PoolResult<()> {
        let mut quit = self.quit.subscribe();
        if *quit.borrow() {
            info!("Worker pool is shutting down, job rejected");
            return Err(PoolError::ShuttingDown);
        }

        tokio::select! {
            res = self.jobs.send(job) => match res {
                Ok(()) => {
                    debug!("Job submitted");
                    Ok(())
                }
                Err(_) => Err(PoolError::ShuttingDown),
            },
            _ = quit.wait_for(|q| *q) => {
                info!("Worker pool is shutting down, job rejected");
                Err(PoolError::ShuttingDown)
            }
        }
    }

    /// Stop the pool: reject new jobs, wait for in-flight jobs, close the queue.
    ///
    /// The only lifecycle transition to terminal; idempotent.
    pub async fn stop(&self) {
        let _ = self.quit.send(true);
        let handle = self
            .dispatcher
            .lock()
            .expect("dispatcher handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }

    /// Number of jobs currently executing.
    pub fn active_workers(&self) -> i32 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Dispatcher loop: accepts jobs until the quit signal, then drains in-flight
/// workers before closing the queue.
async fn dispatch<T, H>(
    handler: Arc<H>,
    mut jobs: mpsc::Receiver<Job<T>>,
    mut quit: watch::Receiver<bool>,
    active: Arc<AtomicI32>,
) where
    T: Clone + Send + 'static,
    H: JobHandler<T>,
{
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            maybe_job = jobs.recv() => match maybe_job {
                Some(job) => {
                    let handler = Arc::clone(&handler);
                    let active = Arc::clone(&active);
                    running.spawn(run_job(handler, job, active));
                }
                None => break,
            },
            res = quit.changed() => {
                if res.is_err() || *quit.borrow() {
                    break;
                }
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
        }
    }

    jobs.close();
    while running.join_next().await.is_some() {}
}

/// One accepted job: retries, outcome logging, unconditional cleanup.
async fn run_job<T, H>(handler: Arc<H>, job: Job<T>, active: Arc<AtomicI32>)
where
    T: Clone + Send + 'static,
    H: JobHandler<T>,
{
    let workers = active.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(handler = handler.name(), workers, "Worker started");

    let Job {
        payload,
        ctx,
        cleanup,
    } = job;

    let result = run_with_retry(handler.as_ref(), payload, &ctx).await;
    match &result {
        Ok(()) => debug!(handler = handler.name(), "Worker finished"),
        Err(e) if e.is_cancellation() => {
            info!(handler = handler.name(), error = %e, "Job cancelled")
        }
        Err(e) => warn!(handler = handler.name(), error = %e, "Job failed"),
    }

    if let Some(cleanup) = cleanup {
        cleanup();
    }
    active.fetch_sub(1, Ordering::SeqCst);
}

async fn run_with_retry<T: Clone, H: JobHandler<T>>(
    handler: &H,
    payload: T,
    ctx: &JobContext,
) -> PoolResult<()> {
    let mut last: Option<PoolError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        if ctx.is_cancelled() {
            return Err(cancellation_error(ctx));
        }

        match handler.run(payload.clone(), ctx).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(attempt, error = %e, "Job attempt failed");
                last = Some(e);
            }
        }

        if attempt < MAX_ATTEMPTS {
            let delay = Duration::from_secs(u64::from(attempt));
            tokio::select! {
                _ = ctx.cancelled() => return Err(cancellation_error(ctx)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(PoolError::Exhausted {
        attempts: MAX_ATTEMPTS,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

fn cancellation_error(ctx: &JobContext) -> PoolError {
    if ctx.deadline_exceeded() {
        PoolError::DeadlineExceeded
    } else {
        PoolError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::oneshot;

    struct CountingHandler {
        attempts: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl JobHandler<u32> for CountingHandler {
        async fn run(&self, _payload: u32, _ctx: &JobContext) -> PoolResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(PoolError::Job(format!("attempt {} failed", n)))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn completion_job(payload: u32, ctx: JobContext) -> (Job<u32>, oneshot::Receiver<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job::new(payload, ctx).with_cleanup(move || {
            let _ = done_tx.send(());
        });
        (job, done_rx)
    }

    #[tokio::test]
    async fn test_job_runs_and_cleanup_fires_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            CountingHandler {
                attempts: Arc::clone(&attempts),
                fail_first: 0,
            },
            4,
        );

        let (job, done) = completion_job(7, JobContext::background());
        pool.submit(job).await.unwrap();
        done.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            CountingHandler {
                attempts: Arc::clone(&attempts),
                fail_first: u32::MAX,
            },
            4,
        );

        let (job, done) = completion_job(1, JobContext::background());
        pool.submit(job).await.unwrap();
        done.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            CountingHandler {
                attempts: Arc::clone(&attempts),
                fail_first: 2,
            },
            4,
        );

        let (job, done) = completion_job(1, JobContext::background());
        pool.submit(job).await.unwrap();
        done.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_remaining_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            CountingHandler {
                attempts: Arc::clone(&attempts),
                fail_first: u32::MAX,
            },
            4,
        );

        let (handle, ctx) = JobContext::new();
        let (job, done) = completion_job(1, ctx);
        pool.submit(job).await.unwrap();

        // Let the first attempt fail, then cancel during the backoff sleep.
        tokio::task::yield_now().await;
        handle.cancel();
        done.await.unwrap();

        assert!(attempts.load(Ordering::SeqCst) < MAX_ATTEMPTS);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let attempts = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            CountingHandler {
                attempts,
                fail_first: 0,
            },
            2,
        );

        pool.stop().await;

        let job = Job::new(1, JobContext::background());
        let err = pool.submit(job).await.unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_jobs() {
        struct SlowHandler {
            finished: Arc<AtomicU32>,
        }

        #[async_trait]
        impl JobHandler<u32> for SlowHandler {
            async fn run(&self, _payload: u32, _ctx: &JobContext) -> PoolResult<()> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let finished = Arc::new(AtomicU32::new(0));
        let pool = Pool::new(
            SlowHandler {
                finished: Arc::clone(&finished),
            },
            2,
        );

        pool.submit(Job::new(1, JobContext::background()))
            .await
            .unwrap();
        // Give the dispatcher a chance to pick the job up before stopping.
        tokio::task::yield_now().await;
        pool.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_workers(), 0);
    }
}
