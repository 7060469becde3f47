use core_config::{config_path, env_or_default, redis::RedisConfig, ConfigError, FromEnv};
use std::time::Duration;

/// Collector configuration, composed from shared components plus the
/// collection-specific knobs.
#[derive(Clone, Debug)]
pub struct Config {
    pub redis: RedisConfig,
    /// Health/metrics server port.
    pub health_port: u16,
    /// Where finished graphs are POSTed.
    pub dataservice_url: String,
    /// Graph template location (catalog stand-in).
    pub template_path: String,
    /// Private key used before password fallback.
    pub ssh_key_path: String,
    /// Login applied when the template does not carry one.
    pub default_login: String,
    /// Concurrent jobs accepted by the pool.
    pub max_workers: usize,
    /// Traversal fan-out inside one job.
    pub traversal_workers: usize,
    /// Hard per-job deadline.
    pub job_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis = RedisConfig::from_env()?;

        let health_port = parse("HEALTH_PORT", "8085")?;
        let max_workers = parse("POOL_MAX_WORKERS", "10")?;
        let traversal_workers = parse("TRAVERSAL_WORKERS", "7")?;
        let job_timeout_secs: u64 = parse("JOB_TIMEOUT_SECS", "60")?;

        Ok(Self {
            redis,
            health_port,
            dataservice_url: env_or_default(
                "DATASERVICE_URL",
                "http://localhost:8082/dataservice",
            ),
            template_path: env_or_default(
                "GRAPH_TEMPLATE_PATH",
                &config_path("collector", "collection-graph.json"),
            ),
            ssh_key_path: env_or_default("SSH_KEY_PATH", ""),
            default_login: env_or_default("SSH_DEFAULT_LOGIN", ""),
            max_workers,
            traversal_workers,
            job_timeout: Duration::from_secs(job_timeout_secs),
        })
    }
}

fn parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env_or_default(key, default)
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{}", e),
        })
}
