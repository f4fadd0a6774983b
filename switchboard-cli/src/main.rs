//! Switchboard CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchboard_config::{load_config, LoggingConfig};
use switchboard_runtime::init_tracing;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Session-aware MCP connection pool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file and print the resolved pool limits
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "switchboard.yaml")]
        config: PathBuf,

        /// Ignore SWITCHBOARD_POOL_* environment overrides
        #[arg(long)]
        no_env: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config, no_env } => {
            init_tracing(&LoggingConfig::default())?;

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config, !no_env) {
                Ok(cfg) => {
                    let pool = &cfg.pool;
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Max connections per server: {}", pool.max_connections_per_server);
                    tracing::info!("  Max pool keys per session: {}", pool.max_connections_per_session);
                    tracing::info!("  Max total connections: {}", pool.max_total_connections);
                    tracing::info!("  Idle timeout: {:?}", pool.idle_timeout);
                    tracing::info!("  Cleanup interval: {:?}", pool.cleanup_interval);
                    tracing::info!("  Session pools: {}", pool.session_pool_sync);
                    tracing::info!(
                        "  Logging: {} ({})",
                        cfg.observability.logging.level,
                        cfg.observability.logging.format
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Switchboard MCP connection pool");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}
