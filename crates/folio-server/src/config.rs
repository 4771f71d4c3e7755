//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default, and the
//! binary's flags override whatever the file says.
//!
//! ```toml
//! bind = "127.0.0.1:7410"
//! database = "folio.db"   # ":memory:" for a throwaway store
//! heartbeat_secs = 15
//! bus_capacity = 1024
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_BUS_CAPACITY, DEFAULT_DATABASE, DEFAULT_HEARTBEAT_SECS,
    DEFAULT_PORT,
};

/// Path value that selects an in-memory database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration for the HTTP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database: PathBuf,
    pub heartbeat_secs: u64,
    pub bus_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(
                DEFAULT_BIND_ADDRESS.parse().unwrap_or([127, 0, 0, 1].into()),
                DEFAULT_PORT,
            ),
            database: PathBuf::from(DEFAULT_DATABASE),
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_secs must be at least 1".into()));
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::Invalid("bus_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == IN_MEMORY_DATABASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind.to_string(), "127.0.0.1:7410");
        assert_eq!(config.database, PathBuf::from("folio.db"));
        assert_eq!(config.heartbeat(), Duration::from_secs(15));
        assert!(!config.is_in_memory());
    }

    #[test]
    fn test_defaults_follow_kernel() {
        let config = ServerConfig::default();
        assert_eq!(config.heartbeat(), folio_kernel::DEFAULT_HEARTBEAT);
        assert_eq!(config.bus_capacity, folio_kernel::FlowBus::default().capacity());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ServerConfig::from_toml("database = \":memory:\"\nheartbeat_secs = 5\n").unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.heartbeat_secs, 5);
        assert_eq!(config.bus_capacity, DEFAULT_BUS_CAPACITY);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_toml("heartbeat_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("port = 80"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "bind = \"0.0.0.0:8080\"\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.bind.port(), 8080);

        let missing = ServerConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
