//! Pool statistics

use crate::key::PoolKey;

/// Point-in-time snapshot of the whole pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections across all pools
    pub total: usize,
    /// Connections currently lent to callers
    pub active: usize,
    /// Connections available for reuse
    pub idle: usize,
    /// Entries in the idle index; equals `idle` when consistent
    pub indexed: usize,
    /// Number of pool keys in the registry
    pub pools: usize,
    /// Number of sessions with at least one registered pool key
    pub sessions: usize,
    /// Creations currently in flight
    pub pending: usize,
    /// Idle index entries fixed by the repair pass since startup
    pub idle_index_repairs: u64,
}

/// Snapshot of a single pool key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKeyStats {
    /// Pool the numbers belong to
    pub pool_key: PoolKey,
    /// Active connections
    pub active: usize,
    /// Idle connections
    pub idle: usize,
    /// Creations in flight
    pub pending: usize,
}

impl PoolKeyStats {
    /// Live connections in this pool
    pub fn total(&self) -> usize {
        self.active + self.idle
    }
}
