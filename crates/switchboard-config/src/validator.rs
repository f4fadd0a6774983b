//! Configuration validation

use crate::Config;
use switchboard_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_pool(config)?;
    validate_logging(config)?;

    Ok(())
}

fn validate_pool(config: &Config) -> Result<()> {
    let pool = &config.pool;

    if pool.max_connections_per_server == 0 {
        return Err(Error::Config(
            "max_connections_per_server must be > 0".to_string(),
        ));
    }
    if pool.max_connections_per_session == 0 {
        return Err(Error::Config(
            "max_connections_per_session must be > 0".to_string(),
        ));
    }
    if pool.max_total_connections == 0 {
        return Err(Error::Config("max_total_connections must be > 0".to_string()));
    }
    if pool.idle_timeout.is_zero() {
        return Err(Error::Config("idle_timeout must be > 0".to_string()));
    }
    if pool.cleanup_interval.is_zero() {
        return Err(Error::Config("cleanup_interval must be > 0".to_string()));
    }
    if pool.connect_timeout.is_zero() {
        return Err(Error::Config("connect_timeout must be > 0".to_string()));
    }
    if pool.close_timeout.is_zero() {
        return Err(Error::Config("close_timeout must be > 0".to_string()));
    }
    if pool.health_check_timeout.is_zero() {
        return Err(Error::Config("health_check_timeout must be > 0".to_string()));
    }

    if pool.max_connections_per_server > pool.max_total_connections {
        tracing::warn!(
            per_server = pool.max_connections_per_server,
            total = pool.max_total_connections,
            "max_connections_per_server exceeds max_total_connections"
        );
    }

    if pool.cleanup_interval > pool.idle_timeout {
        tracing::warn!(
            cleanup_interval = ?pool.cleanup_interval,
            idle_timeout = ?pool.idle_timeout,
            "cleanup_interval is longer than idle_timeout; idle connections will outlive their timeout"
        );
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    let logging = &config.observability.logging;

    match logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(Error::Config(format!("Invalid log level: {other}")));
        }
    }

    match logging.format.as_str() {
        "text" | "json" => {}
        other => {
            return Err(Error::Config(format!(
                "Invalid log format: {other} (must be text or json)"
            )));
        }
    }

    Ok(())
}
