use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing with environment-aware configuration
///
/// - **Production** (`ENVIRONMENT=production`): JSON format for log
///   aggregation, module targets hidden.
/// - **Debug** (default): pretty-printed, module targets shown.
///
/// `RUST_LOG` overrides the default level filters.
///
/// This function is infallible - if tracing is already initialized, it
/// silently continues (common in tests).
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,tower_http=info,russh=warn")
        } else {
            EnvFilter::new("debug,tower_http=debug,russh=info")
        }
    });

    let result = if is_production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
    };

    match result {
        Ok(_) => {
            info!("Tracing initialized. Environment: {:?}", environment);
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}

/// Install color-eyre for colored error reports in binaries.
///
/// Safe to call more than once.
pub fn install_color_eyre() {
    let _ = color_eyre::install();
}
