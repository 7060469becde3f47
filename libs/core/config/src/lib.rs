pub mod mongodb;
pub mod redis;
pub mod server;
pub mod tracing;

use std::env;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment (debug = local/lab, production = full cluster)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Debug,      // Local development, verbose pretty logs
    Production, // Cluster deployment, JSON logs
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("ENVIRONMENT").unwrap_or_else(|_| "debug".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Debug
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, Environment::Debug)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load an environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load an environment variable or return an error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Resolve a service's config-file path.
///
/// `<SERVICE>_CONFIG_PATH` (service name uppercased, dashes mapped to
/// underscores) overrides the default search path.
pub fn config_path(service: &str, default: &str) -> String {
    let key = format!(
        "{}_CONFIG_PATH",
        service.to_ascii_uppercase().replace('-', "_")
    );
    env::var(key).unwrap_or_else(|_| default.to_string())
}
