//! Redis connection helpers.

use crate::BusResult;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Connect to Redis and return a `ConnectionManager`.
///
/// The ConnectionManager handles reconnection on its own; the initial PING
/// verifies the server is actually reachable.
pub async fn connect(url: &str) -> BusResult<ConnectionManager> {
    info!("Connecting to Redis at {}", url);

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Connected to Redis");
    Ok(manager)
}

/// Connect with retry for transient startup failures.
///
/// Exponential delays of `250ms × 2ⁿ` between attempts.
pub async fn connect_with_retry(url: &str, max_attempts: u32) -> BusResult<ConnectionManager> {
    let max_attempts = max_attempts.max(1);
    let mut last = None;

    for attempt in 1..=max_attempts {
        match connect(url).await {
            Ok(manager) => return Ok(manager),
            Err(e) => {
                warn!(attempt, error = %e, "Redis connection attempt failed");
                last = Some(e);
                if attempt < max_attempts {
                    let delay = Duration::from_millis(250 * 2u64.pow(attempt - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last.expect("at least one connection attempt"))
}
