//! Pool runtime: owns the pool and ties its lifetime to process shutdown

use crate::shutdown::{ShutdownSignal, SignalHandler};
use crate::RuntimeState;
use parking_lot::RwLock;
use std::sync::Arc;
use switchboard_config::PoolConfig;
use switchboard_core::Result;
use switchboard_pool::{ConnectionFactory, SessionPool};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Composition root for a [`SessionPool`]
///
/// Builds the pool, starts its reaper when run, and calls
/// [`SessionPool::cleanup`] once the shutdown signal fires.
pub struct PoolRuntime<F: ConnectionFactory> {
    pool: Arc<SessionPool<F>>,
    shutdown: ShutdownSignal,
    state: Arc<RwLock<RuntimeState>>,
}

impl<F: ConnectionFactory> PoolRuntime<F> {
    /// Create a runtime around a new pool
    pub fn new(config: PoolConfig, factory: Arc<F>) -> Self {
        Self {
            pool: Arc::new(SessionPool::new(config, factory)),
            shutdown: ShutdownSignal::new(),
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
        }
    }

    /// The managed pool
    pub fn pool(&self) -> &Arc<SessionPool<F>> {
        &self.pool
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeState {
        *self.state.read()
    }

    /// Listen for OS termination signals in the background
    pub fn install_signal_handler(&self) -> JoinHandle<()> {
        let handler = SignalHandler::new(self.shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                error!(error = %e, "Failed to listen for shutdown signals");
            }
        })
    }

    /// Start the reaper, wait for shutdown, then close every connection
    pub async fn run_until_shutdown(&self) -> Result<()> {
        *self.state.write() = RuntimeState::Running;
        self.pool.start_reaper();

        let config = self.pool.config();
        info!(
            max_total_connections = config.max_total_connections,
            max_connections_per_server = config.max_connections_per_server,
            max_connections_per_session = config.max_connections_per_session,
            session_pool_sync = config.session_pool_sync,
            "Connection pool running"
        );

        self.shutdown.wait().await;

        *self.state.write() = RuntimeState::ShuttingDown;
        self.pool.log_stats();
        self.pool.cleanup().await;
        *self.state.write() = RuntimeState::Stopped;

        info!("Connection pool runtime stopped");
        Ok(())
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolRuntime<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRuntime")
            .field("pool", &self.pool)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
