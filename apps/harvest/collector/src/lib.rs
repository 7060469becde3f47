//! Collector Service
//!
//! Consumes collection requests from the bus, runs each one through the
//! worker pool (bounded concurrency, retry, cleanup), then ships the
//! populated graph to the dataservice.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (harvest:requests)
//!   ↓ (consumer group: collectors, commit-after-decode)
//! BusConsumer<CollectRequest>
//!   ↓ (Job<CollectJob> + 60s deadline + cancel-map entry)
//! Pool<CollectJob> ── CollectProcessor
//!   ↓ (7 traversal workers over the graph, resilient SSH)
//! JobRunner → Graph
//!   ↓ (HTTP POST)
//! Dataservice → MongoDB
//! ```

use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::Environment;
use domain_collection::{
    CollectJob, CollectRequest, CollectRequestStream, JobRunner, RunnerConfig,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_bus::metrics::{self, JobOutcome};
use stream_bus::{BusConfig, BusConsumer, BusError, StreamDef};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;
use worker_pool::{CancelHandle, Job, JobContext, Pool};

mod config;
mod handler;
mod health;

use config::Config;
use handler::{CollectProcessor, DataserviceClient};

/// Execution-id → cancel handle for jobs currently in flight.
///
/// Entries are removed by the same cleanup path that consumes them, so
/// the map cannot leak across job lifetimes.
type CancelMap = Arc<Mutex<HashMap<Uuid, CancelHandle>>>;

/// Run the collector service.
pub async fn run() -> eyre::Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);
    metrics::init_metrics();

    let config = Config::from_env().map_err(|e| eyre::eyre!("configuration: {}", e))?;
    info!(
        template = %config.template_path,
        dataservice = %config.dataservice_url,
        max_workers = config.max_workers,
        traversal_workers = config.traversal_workers,
        "Starting collector service"
    );

    let redis = stream_bus::connect_with_retry(&config.redis.url, 3)
        .await
        .map_err(|e| eyre::eyre!("Redis connection failed: {}", e))?;

    // Bus consumer with group semantics.
    let bus_config = BusConfig::from_stream_def::<CollectRequestStream>();
    let consumer: Arc<BusConsumer<CollectRequest>> =
        Arc::new(BusConsumer::new(redis.clone(), bus_config));
    consumer
        .ensure_group()
        .await
        .map_err(|e| eyre::eyre!("consumer group: {}", e))?;
    if let Err(e) = consumer.claim_pending_on_startup().await {
        warn!(error = %e, "Failed to claim pending messages on startup");
    }

    // Job runner + pool.
    let runner = Arc::new(JobRunner::new(
        RunnerConfig::new(config.template_path.clone())
            .with_ssh_key_path(config.ssh_key_path.clone())
            .with_default_login(config.default_login.clone())
            .with_traversal_workers(config.traversal_workers),
    ));
    let processor = CollectProcessor::new(runner, DataserviceClient::new(&config.dataservice_url));
    let pool = Arc::new(Pool::new(processor, config.max_workers));

    let cancel_map: CancelMap = Arc::new(Mutex::new(HashMap::new()));

    // Shutdown wiring: the signal cancels the consumer context; in-flight
    // jobs run to completion or cancellation via the pool stop below.
    let (root_handle, root_ctx) = JobContext::new();
    let consumer_for_signal = Arc::clone(&consumer);
    tokio::spawn(async move {
        shutdown_signal().await;
        consumer_for_signal.close();
        root_handle.cancel();
    });

    // Health and metrics server.
    let health_state = health::HealthState {
        redis: redis.clone(),
        app_name: env!("CARGO_PKG_NAME"),
        app_version: env!("CARGO_PKG_VERSION"),
    };
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = serve_health(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    consume_loop(&config, &consumer, &pool, &cancel_map, &root_ctx).await;

    info!("Stopping worker pool");
    pool.stop().await;

    info!("Collector service stopped");
    Ok(())
}

/// Main consumer loop: read → build job → submit.
async fn consume_loop(
    config: &Config,
    consumer: &BusConsumer<CollectRequest>,
    pool: &Pool<CollectJob>,
    cancel_map: &CancelMap,
    ctx: &JobContext,
) {
    let stream_name = CollectRequestStream::STREAM_NAME;

    loop {
        let delivery = match consumer.read(ctx).await {
            Ok(delivery) => delivery,
            Err(BusError::Closed) => {
                info!("Consumer closed, leaving read loop");
                break;
            }
            Err(e) => {
                match e {
                    BusError::Decode(_) => warn!(error = %e, "Skipping undecodable message"),
                    _ => error!(error = %e, "Bus read failed"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let mut request = delivery.payload;
        let execution_id = request.ensure_execution_id();
        if let Err(e) = request.validate() {
            warn!(execution_id = %execution_id, error = %e, "Dropping invalid request");
            continue;
        }

        info!(
            hostid = request.hostid,
            scriptid = request.scriptid,
            execution_id = %execution_id,
            "Received collection request"
        );

        let job = CollectJob {
            host_id: request.hostid,
            script_id: request.scriptid,
            execution_id,
        };

        let (handle, job_ctx) = JobContext::with_timeout(config.job_timeout);
        cancel_map
            .lock()
            .expect("cancel map lock poisoned")
            .insert(execution_id, handle);

        let cleanup_map = Arc::clone(cancel_map);
        let pool_job = Job::new(job, job_ctx).with_cleanup(move || {
            if let Some(handle) = cleanup_map
                .lock()
                .expect("cancel map lock poisoned")
                .remove(&execution_id)
            {
                handle.cancel();
            }
        });

        if pool.submit(pool_job).await.is_err() {
            warn!(execution_id = %execution_id, "Pool is shutting down, job rejected");
            metrics::record_job(stream_name, JobOutcome::Rejected);
            // The rejected job never ran its cleanup; drop the entry here.
            cancel_map
                .lock()
                .expect("cancel map lock poisoned")
                .remove(&execution_id);
            break;
        }

        metrics::set_active_workers(stream_name, pool.active_workers() as f64);
    }
}

async fn serve_health(state: health::HealthState, port: u16) -> eyre::Result<()> {
    let app = health::health_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| eyre::eyre!("failed to bind health server to {}: {}", addr, e))?;

    info!(port, "Health and metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| eyre::eyre!("health server: {}", e))?;
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
