//! Tracing subscriber setup

use switchboard_config::LoggingConfig;
use switchboard_core::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for `config`.
///
/// `RUST_LOG` directives are kept; the configured level is added on top.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        other => return Err(Error::Config(format!("Invalid log level: {other}"))),
    };

    Ok(EnvFilter::from_default_env().add_directive(level.into()))
}

/// Install the global subscriber (text or JSON output)
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init(),
        "text" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init(),
        other => return Err(Error::Config(format!("Invalid log format: {other}"))),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
