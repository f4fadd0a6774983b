//! # Switchboard Pool
//!
//! Session-aware connection pool for MCP server clients.
//!
//! ## Features
//!
//! - Per-session pool partitioning with a per-session key quota
//! - Per-server and global connection ceilings with oldest-idle eviction
//! - Serialized acquisitions per session
//! - Background idle reaper and self-healing idle index
//! - Best-effort teardown of failed and evicted connections
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard_pool::SessionPool;
//!
//! let pool = Arc::new(SessionPool::new(config.pool, Arc::new(factory)));
//! pool.start_reaper();
//!
//! let client = pool
//!     .get_connection("instance-1", "github", &server_config, Some("session-42"))
//!     .await?;
//! client.ping().await?;
//! pool.release_connection("instance-1", "github", &client, Some("session-42"));
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod key;
pub mod pool;
pub mod stats;

mod idle_index;
mod reaper;
mod record;
mod session_lock;
mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ConnectionFactory, CreatedConnection, CredentialsCleanup, McpClient, Transport};
pub use key::PoolKey;
pub use pool::SessionPool;
pub use record::PooledClient;
pub use stats::{PoolKeyStats, PoolStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ConnectionFactory, CreatedConnection, McpClient, Transport};
    pub use crate::pool::SessionPool;
    pub use crate::record::PooledClient;
    pub use crate::stats::PoolStats;
    pub use switchboard_core::{Error, Result};
}
