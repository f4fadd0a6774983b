//! # Switchboard Runtime
//!
//! Lifecycle management for the connection pool:
//! - Pool construction and reaper startup
//! - Graceful shutdown with signal handling
//! - Tracing subscriber initialisation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod runtime;
pub mod shutdown;
pub mod telemetry;

pub use runtime::PoolRuntime;
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use telemetry::init_tracing;

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Pool is constructed but not running
    Initializing,
    /// Reaper running, serving acquisitions
    Running,
    /// Closing connections
    ShuttingDown,
    /// All connections closed
    Stopped,
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::runtime::PoolRuntime;
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::RuntimeState;
}
