//! Job runner: drives one collection job end-to-end.
//!
//! Loads the graph template, dials the resilient transport, fans the lazy
//! node sequence out to N traversal workers and aggregates the result.
//! The first worker error cancels the linked job context; every other
//! worker observes it and returns, and no partial graph is persisted.

use crate::error::CollectError;
use crate::executor::NodeExecutor;
use crate::graph::{Graph, GraphTemplate};
use crate::models::{HostConfig, TransportConfig};
use crate::processor::ProcessorChain;
use crate::resilience::RetryPolicy;
use crate::transport::{ScriptRunner, SshTransport};
use crate::CollectResult;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker_pool::JobContext;

/// Traversal fan-out per job.
pub const DEFAULT_TRAVERSAL_WORKERS: usize = 7;

/// One job: execute one graph for one host.
#[derive(Debug, Clone)]
pub struct CollectJob {
    pub host_id: i64,
    pub script_id: i64,
    pub execution_id: Uuid,
}

/// Runner configuration; template path and SSH defaults come from the
/// service environment.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub template_path: String,
    pub ssh_key_path: String,
    pub default_login: String,
    pub traversal_workers: usize,
}

impl RunnerConfig {
    pub fn new(template_path: impl Into<String>) -> Self {
        Self {
            template_path: template_path.into(),
            ssh_key_path: String::new(),
            default_login: String::new(),
            traversal_workers: DEFAULT_TRAVERSAL_WORKERS,
        }
    }

    pub fn with_ssh_key_path(mut self, path: impl Into<String>) -> Self {
        self.ssh_key_path = path.into();
        self
    }

    pub fn with_default_login(mut self, login: impl Into<String>) -> Self {
        self.default_login = login.into();
        self
    }

    pub fn with_traversal_workers(mut self, workers: usize) -> Self {
        self.traversal_workers = workers.max(1);
        self
    }
}

/// Runs collection jobs against live SSH transports.
pub struct JobRunner {
    config: RunnerConfig,
    chain: Arc<ProcessorChain>,
    retry: RetryPolicy,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            chain: Arc::new(ProcessorChain::new()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one job: template → graph → dial → traverse → populated graph.
    pub async fn run(&self, job: CollectJob, ctx: &JobContext) -> CollectResult<Graph> {
        info!(
            host_id = job.host_id,
            script_id = job.script_id,
            execution_id = %job.execution_id,
            "Starting collection job"
        );

        let template = GraphTemplate::from_file(&self.config.template_path)?;
        let graph = self.assemble(&job, template)?;
        graph.validate(&self.chain)?;

        let transport = Arc::new(SshTransport::connect(&graph.transport, ctx).await?);
        let result = self.traverse(graph, Arc::clone(&transport), ctx).await;
        transport.close().await;

        match &result {
            Ok(_) => info!(execution_id = %job.execution_id, "Collection job finished"),
            Err(e) => warn!(execution_id = %job.execution_id, error = %e, "Collection job failed"),
        }
        result
    }

    /// Assemble the per-job graph from the template and the request.
    fn assemble(&self, job: &CollectJob, template: GraphTemplate) -> CollectResult<Graph> {
        let transport = TransportConfig {
            version: template.version.clone(),
            remote_host: template.remote_host.clone(),
            login: template
                .login
                .clone()
                .unwrap_or_else(|| self.config.default_login.clone()),
            password: template.password.clone().unwrap_or_default(),
            ssh_key_path: template
                .ssh_key_path
                .clone()
                .unwrap_or_else(|| self.config.ssh_key_path.clone()),
        };

        let host = lookup_host_config(job);
        Ok(Graph::new(
            transport,
            host,
            job.execution_id,
            template.structure,
        ))
    }

    /// Traverse a validated graph with the given script runner.
    ///
    /// Separated from `run` so tests can substitute a fake runner for the
    /// SSH transport.
    pub async fn traverse<R: ScriptRunner + 'static>(
        &self,
        graph: Graph,
        runner: Arc<R>,
        ctx: &JobContext,
    ) -> CollectResult<Graph> {
        let graph = Arc::new(graph);
        let sequence = Graph::sequence(&graph);
        let executor = Arc::new(
            NodeExecutor::new(runner, Arc::clone(&self.chain))
                .with_retry_policy(self.retry.clone()),
        );

        // Linked cancellation: the first error cancels every sibling.
        let (cancel, traverse_ctx) = ctx.child();

        let mut workers: JoinSet<CollectResult<()>> = JoinSet::new();
        for worker in 0..self.config.traversal_workers.max(1) {
            let graph = Arc::clone(&graph);
            let sequence = sequence.clone();
            let executor = Arc::clone(&executor);
            let worker_ctx = traverse_ctx.clone();

            workers.spawn(async move {
                debug!(worker, "Traversal worker started");
                while let Some(id) = sequence.next().await {
                    executor.execute(&graph, id, &worker_ctx).await?;
                }
                debug!(worker, "Traversal worker drained");
                Ok(())
            });
        }

        let mut first_error: Option<CollectError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(CollectError::Internal(format!("worker panicked: {}", e))));
            if let Err(e) = outcome {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        sequence.shutdown().await;
        drop(sequence);

        match first_error {
            Some(e) => Err(e),
            None => Arc::try_unwrap(graph)
                .map_err(|_| CollectError::Internal("graph still shared after join".to_string())),
        }
    }
}

/// Host catalog lookup.
///
/// TODO: replace with the inventory-service query once its API is final;
/// until then jobs run with the ids carried by the request.
fn lookup_host_config(job: &CollectJob) -> HostConfig {
    HostConfig {
        customer_id: 1,
        host_id: job.host_id,
        script_id: job.script_id,
        ..Default::default()
    }
}
