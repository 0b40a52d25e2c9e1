//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the supervisor.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for one proxy generation.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Process-wide settings (worker count, drain timeout).
    pub global: GlobalConfig,

    /// Proxy pool definitions, in configuration order.
    pub pools: Vec<PoolConfig>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Number of worker processes per generation.
    pub worker_processes: usize,

    /// Grace period a quitting worker waits for in-flight connections, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            worker_processes: 1,
            shutdown_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

/// One configured listening endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Pool label, used for logging only.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:6379"). Listeners migrate by this key.
    pub listen: String,

    /// Backend addresses the relay forwards to.
    #[serde(default)]
    pub servers: Vec<String>,

    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Backend connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl PoolConfig {
    /// A pool with no backends and default tuning.
    pub fn new(name: impl Into<String>, listen: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listen: listen.into(),
            servers: Vec::new(),
            backlog: default_backlog(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_backlog() -> i32 {
    512
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_pool_gets_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[pools]]
            name = "cache"
            listen = "127.0.0.1:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.global.worker_processes, 1);
        assert_eq!(config.global.shutdown_timeout_secs, 30);
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].backlog, 512);
        assert_eq!(config.pools[0].connect_timeout_ms, 1000);
        assert!(config.pools[0].servers.is_empty());
    }

    #[test]
    fn pool_without_listen_is_rejected() {
        let result: Result<ProxyConfig, _> = toml::from_str(
            r#"
            [[pools]]
            name = "cache"
            "#,
        );
        assert!(result.is_err());
    }
}
