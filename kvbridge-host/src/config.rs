//! Host server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KVBRIDGE_CONFIG)
//! 3. Environment variables

use crate::server::ServerConfig;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration load errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Host server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Per-session tuning.
    pub session: SessionTuning,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], kvbridge_protocol::DEFAULT_PORT)),
            max_connections: 1024,
        }
    }
}

/// Per-session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Maximum entries per iterator data frame.
    pub iterator_batch_size: usize,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
}

impl Default for SessionTuning {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            iterator_batch_size: session.iterator_batch_size,
            max_frame_size: session.max_frame_size,
        }
    }
}

impl Config {
    /// Loads configuration from file (if KVBRIDGE_CONFIG is set), then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("KVBRIDGE_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::IoError(path.to_path_buf(), err))?;
        Self::from_yaml(&content)
            .map_err(|err| ConfigError::ParseError(path.to_path_buf(), err))
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        serde_yaml::from_str(content).map_err(|err| err.to_string())
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Some(addr) = env_parsed("KVBRIDGE_BIND_ADDR") {
            self.network.bind_addr = addr;
        }
        if let Some(max) = env_parsed("KVBRIDGE_MAX_CONNECTIONS") {
            self.network.max_connections = max;
        }
        if let Some(size) = env_parsed("KVBRIDGE_ITERATOR_BATCH_SIZE") {
            self.session.iterator_batch_size = size;
        }
        if let Some(size) = env_parsed("KVBRIDGE_MAX_FRAME_SIZE") {
            self.session.max_frame_size = size;
        }
    }

    /// Builds the runtime server configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.network.bind_addr,
            max_connections: self.network.max_connections,
            session: SessionConfig {
                iterator_batch_size: self.session.iterator_batch_size,
                max_frame_size: self.session.max_frame_size,
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.network.bind_addr.port(),
            kvbridge_protocol::DEFAULT_PORT
        );
        assert_eq!(config.session.iterator_batch_size, 64);
    }

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(
            "network:\n  bind_addr: 0.0.0.0:9000\n  max_connections: 16\nsession:\n  iterator_batch_size: 8\n",
        )
        .unwrap();
        assert_eq!(config.network.bind_addr.port(), 9000);
        assert_eq!(config.network.max_connections, 16);
        assert_eq!(config.session.iterator_batch_size, 8);
        // Unspecified fields keep their defaults.
        assert_eq!(
            config.session.max_frame_size,
            kvbridge_protocol::DEFAULT_MAX_FRAME_SIZE
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml("session:\n  iterator_batch_size: 2\n").unwrap();
        assert_eq!(config.session.iterator_batch_size, 2);
        assert_eq!(
            config.network.bind_addr.port(),
            kvbridge_protocol::DEFAULT_PORT
        );
    }

    #[test]
    fn test_server_config_bridge() {
        let mut config = Config::default();
        config.session.iterator_batch_size = 5;
        let server = config.server_config();
        assert_eq!(server.session.iterator_batch_size, 5);
        assert_eq!(server.bind_addr, config.network.bind_addr);
    }
}
