use crate::{env_or_default, ConfigError, FromEnv};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// HTTP listen address for a service.
///
/// Resolution order: `BIND_ADDR` (full `ip:port`) when set, otherwise
/// `HOST` + `PORT`, falling back to all interfaces on 8080. Port 0 is
/// rejected: pipeline services address each other by fixed ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(ip: IpAddr, port: u16) -> Result<Self, ConfigError> {
        Self::from_socket_addr(SocketAddr::new(ip, port), "PORT")
    }

    fn from_socket_addr(addr: SocketAddr, key: &str) -> Result<Self, ConfigError> {
        if addr.port() == 0 {
            return Err(ConfigError::ParseError {
                key: key.to_string(),
                details: "port 0 would bind an OS-assigned port".to_string(),
            });
        }
        Ok(Self { addr })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The listen address as an `ip:port` string.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl FromEnv for ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        if let Ok(raw) = env::var("BIND_ADDR") {
            let addr: SocketAddr = raw.parse().map_err(|e| ConfigError::ParseError {
                key: "BIND_ADDR".to_string(),
                details: format!("{}", e),
            })?;
            return Self::from_socket_addr(addr, "BIND_ADDR");
        }

        let ip: IpAddr = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string())
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "HOST".to_string(),
                details: format!("{}", e),
            })?;
        let port: u16 =
            env_or_default("PORT", "8080")
                .parse()
                .map_err(|e| ConfigError::ParseError {
                    key: "PORT".to_string(),
                    details: format!("{}", e),
                })?;

        Self::from_socket_addr(SocketAddr::new(ip, port), "PORT")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            [
                ("BIND_ADDR", None::<&str>),
                ("HOST", None),
                ("PORT", None),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config, ServerConfig::default());
                assert_eq!(config.address(), "0.0.0.0:8080");
                assert_eq!(config.port(), 8080);
            },
        );
    }

    #[test]
    fn test_bind_addr_wins_over_host_and_port() {
        temp_env::with_vars(
            [
                ("BIND_ADDR", Some("127.0.0.1:9000")),
                ("HOST", Some("10.1.2.3")),
                ("PORT", Some("8083")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:9000");
            },
        );
    }

    #[test]
    fn test_host_and_port_pair() {
        temp_env::with_vars(
            [
                ("BIND_ADDR", None::<&str>),
                ("HOST", Some("127.0.0.1")),
                ("PORT", Some("8083")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(
                    config.socket_addr(),
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8083)
                );
            },
        );
    }

    #[test]
    fn test_rejects_non_ip_host() {
        temp_env::with_vars(
            [("BIND_ADDR", None::<&str>), ("HOST", Some("not-an-ip"))],
            || {
                let err = ServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("HOST"));
            },
        );
    }

    #[test]
    fn test_rejects_invalid_port() {
        temp_env::with_vars(
            [("BIND_ADDR", None::<&str>), ("PORT", Some("not_a_number"))],
            || {
                let err = ServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("PORT"));
            },
        );
    }

    #[test]
    fn test_rejects_port_zero() {
        temp_env::with_vars(
            [("BIND_ADDR", None::<&str>), ("PORT", Some("0"))],
            || {
                let err = ServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("port 0"));
            },
        );

        temp_env::with_var("BIND_ADDR", Some("0.0.0.0:0"), || {
            assert!(ServerConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_rejects_malformed_bind_addr() {
        temp_env::with_var("BIND_ADDR", Some("localhost:8080"), || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("BIND_ADDR"));
        });
    }

    #[test]
    fn test_new_rejects_port_zero() {
        let result = ServerConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        assert!(result.is_err());
    }
}
