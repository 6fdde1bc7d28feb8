//! Dispatcher configuration

use crate::supervisor::SupervisorConfig;
use crate::worker::PoolConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration consumed by the dispatcher binary and server builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Client-facing inference address
    pub serve_addr: String,

    /// Private worker management address
    pub management_addr: String,

    /// Server name reported by ServerMetadata
    pub server_name: String,

    /// Server version reported by ServerMetadata
    pub server_version: String,

    /// Connection cap per worker endpoint
    pub max_connections_per_worker: usize,

    /// Bound on connecting to a worker socket, in milliseconds
    pub connect_timeout_ms: u64,

    /// Bound on one full worker exchange, in milliseconds
    pub request_timeout_ms: u64,

    /// Recycle healthy worker connections instead of closing per request
    pub reuse_connections: bool,

    /// Bound on worker readiness, in seconds
    pub ready_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on worker stop, in seconds
    pub stop_grace_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            serve_addr: "0.0.0.0:8001".to_string(),
            management_addr: "0.0.0.0:8002".to_string(),
            server_name: "infermux-dispatcher".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_connections_per_worker: 10,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            reuse_connections: false,
            ready_timeout_secs: 10,
            stop_grace_secs: 5,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from a JSON file; absent keys take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Pool policy derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections_per_endpoint: self.max_connections_per_worker,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reuse_connections: self.reuse_connections,
        }
    }

    /// Supervisor timing derived from this configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
        }
    }

    /// Bound on one full worker exchange.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DispatcherConfig::default();
        assert_eq!(config.serve_addr, "0.0.0.0:8001");
        assert_eq!(config.management_addr, "0.0.0.0:8002");
        assert_eq!(config.supervisor_config().ready_timeout, Duration::from_secs(10));
        assert_eq!(config.supervisor_config().stop_grace, Duration::from_secs(5));
        assert!(!config.pool_config().reuse_connections);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatcher.json");
        std::fs::write(
            &path,
            r#"{"serve_addr": "127.0.0.1:9001", "max_connections_per_worker": 4}"#,
        )
        .unwrap();

        let config = DispatcherConfig::from_file(&path).unwrap();
        assert_eq!(config.serve_addr, "127.0.0.1:9001");
        assert_eq!(config.max_connections_per_worker, 4);
        // Untouched keys keep their defaults.
        assert_eq!(config.management_addr, "0.0.0.0:8002");
    }
}
