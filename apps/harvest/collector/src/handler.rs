//! Pool job handler: run the collection, persist the graph.
//!
//! Only collection failures are retryable. A store failure after a
//! successful run is logged and swallowed: the core never re-executes
//! remote scripts for a storage-layer problem, and bus redelivery plus
//! the `(hostId, executionId)` upsert cover replays.

use async_trait::async_trait;
use domain_collection::{CollectError, CollectJob, CollectRequestStream, Graph, JobRunner};
use std::sync::Arc;
use std::time::Duration;
use stream_bus::metrics::{self, JobOutcome};
use stream_bus::StreamDef;
use tracing::{error, info};
use worker_pool::{JobContext, JobHandler, PoolError, PoolResult};

/// HTTP client for the dataservice hop.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct DataserviceClient {
    http: reqwest::Client,
    url: String,
}

impl DataserviceClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(STORE_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            url: url.into(),
        }
    }

    /// POST the serialized graph; any non-2xx response is a persistence
    /// failure.
    pub async fn store(&self, graph: &Graph) -> Result<(), CollectError> {
        let response = self
            .http
            .post(&self.url)
            .json(graph)
            .send()
            .await
            .map_err(|e| CollectError::Persistence(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CollectError::Persistence(format!(
                "dataservice returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Handler the worker pool drives for every accepted job.
pub struct CollectProcessor {
    runner: Arc<JobRunner>,
    dataservice: DataserviceClient,
}

impl CollectProcessor {
    pub fn new(runner: Arc<JobRunner>, dataservice: DataserviceClient) -> Self {
        Self {
            runner,
            dataservice,
        }
    }
}

#[async_trait]
impl JobHandler<CollectJob> for CollectProcessor {
    async fn run(&self, job: CollectJob, ctx: &JobContext) -> PoolResult<()> {
        let execution_id = job.execution_id;
        let stream = CollectRequestStream::STREAM_NAME;

        let graph = match self.runner.run(job, ctx).await {
            Ok(graph) => graph,
            Err(e) => {
                let outcome = if e.is_cancellation() {
                    JobOutcome::Cancelled
                } else {
                    JobOutcome::Failed
                };
                metrics::record_job(stream, outcome);
                return Err(PoolError::from(e));
            }
        };

        // The job itself succeeded; a store failure is logged but never
        // retried here, so the scripts do not run again on the live host.
        if let Err(e) = self.dataservice.store(&graph).await {
            error!(execution_id = %execution_id, error = %e, "Failed to persist graph");
            metrics::record_job(stream, JobOutcome::Failed);
            return Ok(());
        }

        metrics::record_job(stream, JobOutcome::Success);
        info!(execution_id = %execution_id, "Graph persisted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collect"
    }
}
