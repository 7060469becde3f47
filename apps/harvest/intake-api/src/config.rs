use core_config::{redis::RedisConfig, server::ServerConfig, ConfigError, FromEnv};

/// Application configuration, composed from shared config components.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?, // BIND_ADDR or HOST/PORT, default 0.0.0.0:8080
            redis: RedisConfig::from_env()?,   // Required
        })
    }
}
