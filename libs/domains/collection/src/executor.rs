//! Node executor: runs one node end-to-end with retry.
//!
//! A node attempt is the breaker-wrapped unit of work; the retry policy
//! wraps the attempt. Output from failed attempts is discarded, and the
//! node's result is written exactly once, on the attempt that succeeds.

use crate::error::{CollectError, ErrorCategory};
use crate::graph::{Graph, NodeId, NodeOutput};
use crate::processor::ProcessorChain;
use crate::resilience::RetryPolicy;
use crate::transport::ScriptRunner;
use crate::CollectResult;
use std::sync::Arc;
use tracing::{debug, warn};
use worker_pool::JobContext;

/// Executes leaf nodes against a script runner.
pub struct NodeExecutor<R> {
    runner: Arc<R>,
    chain: Arc<ProcessorChain>,
    retry: RetryPolicy,
}

impl<R: ScriptRunner> NodeExecutor<R> {
    pub fn new(runner: Arc<R>, chain: Arc<ProcessorChain>) -> Self {
        Self {
            runner,
            chain,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one node to completion.
    ///
    /// Grouping nodes and leaves without a script succeed immediately.
    /// Transient attempt failures are retried under the policy, bounded by
    /// the context deadline; cancellation is permanent.
    pub async fn execute(&self, graph: &Graph, id: NodeId, ctx: &JobContext) -> CollectResult<()> {
        let node = graph.node(id);
        if !node.runnable() {
            return Ok(());
        }

        let mut last: Option<CollectError> = None;

        for attempt in 0..self.retry.max_attempts {
            if ctx.is_cancelled() {
                return Err(CollectError::from_cancelled_ctx(ctx));
            }

            match self.attempt(graph, id, ctx).await {
                Ok(()) => {
                    debug!(node = %node.id, attempt, "Node executed");
                    return Ok(());
                }
                Err(e) if e.category() == ErrorCategory::Permanent => return Err(e),
                Err(e) => {
                    warn!(node = %node.id, attempt, error = %e, "Node attempt failed");
                    last = Some(e);
                }
            }

            if attempt + 1 < self.retry.max_attempts {
                let delay = self.retry.delay_for_attempt(attempt);
                if let Some(remaining) = ctx.remaining() {
                    if delay >= remaining {
                        return Err(CollectError::DeadlineExceeded);
                    }
                }
                tokio::select! {
                    _ = ctx.cancelled() => return Err(CollectError::from_cancelled_ctx(ctx)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last.unwrap_or_else(|| {
            CollectError::Internal("retry loop ended without an error".to_string())
        }))
    }

    /// One attempt: run the script, post-process stdout, publish the output.
    async fn attempt(&self, graph: &Graph, id: NodeId, ctx: &JobContext) -> CollectResult<()> {
        let node = graph.node(id);

        let output = self.runner.run_script(&node.script, ctx).await?;

        let tokens = node.post_process_tokens();
        let result = self
            .chain
            .process(output.stdout, node.node_type, &tokens)?;

        node.publish_output(NodeOutput {
            result,
            stderr: output.stderr,
        })
    }
}
