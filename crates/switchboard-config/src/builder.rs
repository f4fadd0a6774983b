//! Configuration builder

use crate::types::{Config, LoggingConfig, PoolConfig};
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    pool: PoolConfig,
    logging: Option<LoggingConfig>,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole pool section
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set maximum connections per (instance, server) pool
    pub fn max_connections_per_server(mut self, max: usize) -> Self {
        self.pool.max_connections_per_server = max;
        self
    }

    /// Set maximum pool keys per session
    pub fn max_connections_per_session(mut self, max: usize) -> Self {
        self.pool.max_connections_per_session = max;
        self
    }

    /// Set the global connection ceiling
    pub fn max_total_connections(mut self, max: usize) -> Self {
        self.pool.max_total_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool.idle_timeout = timeout;
        self
    }

    /// Set reaper interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.pool.cleanup_interval = interval;
        self
    }

    /// Enable or disable per-session pool partitioning
    pub fn session_pool_sync(mut self, enabled: bool) -> Self {
        self.pool.session_pool_sync = enabled;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.pool.connect_timeout = timeout;
        self
    }

    /// Set logging configuration
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> switchboard_core::Result<Config> {
        let mut config = Config {
            pool: self.pool,
            ..Config::default()
        };
        if let Some(logging) = self.logging {
            config.observability.logging = logging;
        }

        crate::validator::validate_config(&config)?;
        Ok(config)
    }
}
