//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Connection pool limits and timers
    #[serde(default)]
    pub pool: PoolConfig,

    /// Observability
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum connections held in one (instance, server[, session]) pool
    #[serde(default = "default_max_connections_per_server")]
    pub max_connections_per_server: usize,

    /// Maximum number of distinct pool keys a single session may open
    #[serde(default = "default_max_connections_per_session")]
    pub max_connections_per_session: usize,

    /// System-wide ceiling on live connections
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,

    /// Idle connections older than this are reaped
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Interval between reaper ticks
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Partition pools per session
    #[serde(default)]
    pub session_pool_sync: bool,

    /// Upper bound on factory + connect for a new connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on closing a single connection
    #[serde(default = "default_close_timeout", with = "humantime_serde")]
    pub close_timeout: Duration,

    /// Upper bound on a health-check round trip
    #[serde(default = "default_health_check_timeout", with = "humantime_serde")]
    pub health_check_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: default_max_connections_per_server(),
            max_connections_per_session: default_max_connections_per_session(),
            max_total_connections: default_max_total_connections(),
            idle_timeout: default_idle_timeout(),
            cleanup_interval: default_cleanup_interval(),
            session_pool_sync: false,
            connect_timeout: default_connect_timeout(),
            close_timeout: default_close_timeout(),
            health_check_timeout: default_health_check_timeout(),
        }
    }
}

fn default_max_connections_per_server() -> usize {
    5
}

fn default_max_connections_per_session() -> usize {
    10
}

fn default_max_total_connections() -> usize {
    100
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
