//! Shared pool bookkeeping
//!
//! Pool registry, idle index, session registry and counters live together in
//! [`PoolState`]. Every method is synchronous and runs with the pool mutex
//! held, so no lock is ever carried across an `.await`.

use crate::idle_index::IdleIndex;
use crate::key::PoolKey;
use crate::record::{ConnectionRecord, PooledClient};
use crate::stats::{PoolKeyStats, PoolStats};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use switchboard_config::PoolConfig;
use switchboard_core::{Error, Result};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Connections sharing one pool key
#[derive(Debug, Default)]
pub(crate) struct Pool {
    records: Vec<ConnectionRecord>,
    /// Creations in flight for this key
    pending: usize,
    /// Owning session for isolated pools
    session: Option<String>,
}

impl Pool {
    fn load(&self) -> usize {
        self.records.len() + self.pending
    }

    fn position(&self, instance_tag: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| &*record.instance_tag == instance_tag)
    }
}

/// Where an acquisition is headed
#[derive(Debug, Clone, Copy)]
pub(crate) struct AcquireTarget<'a> {
    pub(crate) instance_id: &'a str,
    pub(crate) server_name: &'a str,
    pub(crate) pool_key: &'a PoolKey,
    /// Set only when session isolation applies
    pub(crate) session_id: Option<&'a str>,
}

/// Outcome of the synchronous part of an acquisition
#[derive(Debug)]
pub(crate) enum Plan {
    /// An idle connection was activated
    Reuse(PooledClient),
    /// A slot was reserved; the caller must create a connection and may
    /// first have to close an evicted one
    Create { evicted: Option<ConnectionRecord> },
}

/// Result of handing a connection back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Released,
    AlreadyIdle,
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pools: HashMap<PoolKey, Pool>,
    idle: IdleIndex,
    sessions: HashMap<String, BTreeSet<PoolKey>>,
    total: usize,
    pending: usize,
    repairing: bool,
    repairs: u64,
    shutting_down: bool,
}

impl PoolState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Close the acquisition gate. Returns `false` if already closed.
    pub(crate) fn begin_shutdown(&mut self) -> bool {
        !std::mem::replace(&mut self.shutting_down, true)
    }

    /// Run quota checks in order and either activate an idle connection or
    /// reserve a slot for a new one.
    pub(crate) fn plan_acquisition(
        &mut self,
        target: AcquireTarget<'_>,
        config: &PoolConfig,
        now: Instant,
    ) -> Result<Plan> {
        if self.shutting_down {
            return Err(Error::Internal("pool is shutting down".to_string()));
        }

        let pool_key = target.pool_key;

        if let Some(session_id) = target.session_id {
            if self.session_key_count(session_id) >= config.max_connections_per_session {
                if let Some(handle) = self.reuse_from_session(session_id, pool_key, now) {
                    debug!(
                        session_id,
                        pool_key = %handle.pool_key(),
                        "Session at quota, reusing idle connection"
                    );
                    return Ok(Plan::Reuse(handle));
                }
                warn!(
                    session_id,
                    limit = config.max_connections_per_session,
                    "Session connection quota exceeded"
                );
                return Err(Error::SessionQuotaExceeded {
                    session_id: session_id.to_string(),
                    limit: config.max_connections_per_session,
                });
            }
        }

        if let Some(handle) = self.reuse_idle(pool_key, now, Some(config.idle_timeout)) {
            debug!(%pool_key, instance_tag = handle.instance_tag(), "Reusing idle connection");
            return Ok(Plan::Reuse(handle));
        }

        let load = self.pools.get(pool_key).map_or(0, Pool::load);
        if load >= config.max_connections_per_server {
            if let Some(handle) = self.reuse_idle(pool_key, now, None) {
                debug!(
                    %pool_key,
                    instance_tag = handle.instance_tag(),
                    "Server pool full, force-reusing idle connection"
                );
                return Ok(Plan::Reuse(handle));
            }
            warn!(
                %pool_key,
                limit = config.max_connections_per_server,
                "Server connection pool exhausted"
            );
            return Err(Error::ServerPoolExhausted {
                instance_id: target.instance_id.to_string(),
                server_name: target.server_name.to_string(),
                limit: config.max_connections_per_server,
            });
        }

        let mut evicted = None;
        if self.total + self.pending >= config.max_total_connections {
            match self.evict_oldest_idle() {
                Some(record) => {
                    debug!(
                        pool_key = %record.pool_key,
                        instance_tag = %record.instance_tag,
                        "Evicting oldest idle connection under global pressure"
                    );
                    evicted = Some(record);
                }
                None => {
                    warn!(
                        limit = config.max_total_connections,
                        "Global connection limit reached with nothing idle"
                    );
                    return Err(Error::GlobalPoolExhausted {
                        limit: config.max_total_connections,
                    });
                }
            }
        }

        self.reserve(pool_key, target.session_id);
        Ok(Plan::Create { evicted })
    }

    /// Number of pool keys registered to a session
    pub(crate) fn session_key_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, BTreeSet::len)
    }

    #[cfg(test)]
    pub(crate) fn session_holds(&self, session_id: &str, pool_key: &PoolKey) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|keys| keys.contains(pool_key))
    }

    /// Activate any idle connection in the session's pools, trying
    /// `preferred` first when the session holds it
    fn reuse_from_session(
        &mut self,
        session_id: &str,
        preferred: &PoolKey,
        now: Instant,
    ) -> Option<PooledClient> {
        let keys = self.sessions.get(session_id)?;
        let mut order: Vec<PoolKey> = Vec::with_capacity(keys.len());
        if keys.contains(preferred) {
            order.push(preferred.clone());
        }
        order.extend(keys.iter().filter(|key| *key != preferred).cloned());

        order
            .iter()
            .find_map(|pool_key| self.reuse_idle(pool_key, now, None))
    }

    /// Activate the first idle connection in `pool_key`, optionally only one
    /// idle for at most `max_idle`
    fn reuse_idle(
        &mut self,
        pool_key: &PoolKey,
        now: Instant,
        max_idle: Option<Duration>,
    ) -> Option<PooledClient> {
        let index = self.pools.get(pool_key)?.records.iter().position(|record| {
            record.is_idle() && max_idle.map_or(true, |limit| record.idle_for(now) <= limit)
        })?;
        self.activate(pool_key, index, now)
    }

    fn activate(&mut self, pool_key: &PoolKey, index: usize, now: Instant) -> Option<PooledClient> {
        let record = self.pools.get_mut(pool_key)?.records.get_mut(index)?;
        record.mark_active(now);
        let handle = record.handle();
        let instance_tag = Arc::clone(&record.instance_tag);

        if !self.idle.remove(pool_key, &instance_tag) {
            warn!(%pool_key, %instance_tag, "Idle connection missing from idle index");
            self.repairs += 1;
            self.verify_idle_index();
        }

        Some(handle)
    }

    fn is_idle_record(&self, pool_key: &PoolKey, instance_tag: &str) -> bool {
        self.pools
            .get(pool_key)
            .and_then(|pool| pool.position(instance_tag).map(|i| &pool.records[i]))
            .is_some_and(ConnectionRecord::is_idle)
    }

    /// Remove the globally oldest idle connection, repairing the index once
    /// if it points at something that is not idle
    fn evict_oldest_idle(&mut self) -> Option<ConnectionRecord> {
        let mut repaired = false;
        loop {
            let (pool_key, instance_tag) = {
                let entry = self.idle.oldest()?;
                (entry.pool_key.clone(), Arc::clone(&entry.instance_tag))
            };

            if self.is_idle_record(&pool_key, &instance_tag) {
                return self.remove_record(&pool_key, &instance_tag);
            }

            warn!(%pool_key, %instance_tag, "Stale idle index entry");
            if repaired {
                return None;
            }
            self.verify_idle_index();
            repaired = true;
        }
    }

    /// Remove one connection from every structure and return it for closing
    pub(crate) fn remove_record(
        &mut self,
        pool_key: &PoolKey,
        instance_tag: &str,
    ) -> Option<ConnectionRecord> {
        let pool = self.pools.get_mut(pool_key)?;
        let index = pool.position(instance_tag)?;
        let record = pool.records.remove(index);

        if record.is_idle() {
            self.idle.remove(pool_key, instance_tag);
        }
        self.total = self.total.saturating_sub(1);
        self.prune(pool_key);

        Some(record)
    }

    /// Drop session registration once a pool has no connections left, and
    /// the pool itself once nothing is pending either
    fn prune(&mut self, pool_key: &PoolKey) {
        let Some(pool) = self.pools.get(pool_key) else {
            return;
        };
        if !pool.records.is_empty() {
            return;
        }

        let session = pool.session.clone();
        if pool.pending == 0 {
            self.pools.remove(pool_key);
        }
        if let Some(session_id) = session {
            self.unregister_session_key(&session_id, pool_key);
        }
    }

    fn unregister_session_key(&mut self, session_id: &str, pool_key: &PoolKey) {
        if let Some(keys) = self.sessions.get_mut(session_id) {
            keys.remove(pool_key);
            if keys.is_empty() {
                self.sessions.remove(session_id);
            }
        }
    }

    /// Mark a lent connection idle and index it
    pub(crate) fn release(&mut self, pool_key: &PoolKey, instance_tag: &str, now: Instant) -> Release {
        let Some(record) = self.pools.get_mut(pool_key).and_then(|pool| {
            pool.records
                .iter_mut()
                .find(|record| &*record.instance_tag == instance_tag)
        }) else {
            return Release::Unknown;
        };

        if record.is_idle() {
            return Release::AlreadyIdle;
        }

        record.mark_idle(now);
        self.idle.insert(record);
        Release::Released
    }

    /// Hold a creation slot against the per-server and global caps
    pub(crate) fn reserve(&mut self, pool_key: &PoolKey, session_id: Option<&str>) {
        let pool = self.pools.entry(pool_key.clone()).or_default();
        pool.pending += 1;
        if pool.session.is_none() {
            pool.session = session_id.map(str::to_string);
        }
        self.pending += 1;
    }

    pub(crate) fn cancel_reservation(&mut self, pool_key: &PoolKey) {
        self.pending = self.pending.saturating_sub(1);
        if let Some(pool) = self.pools.get_mut(pool_key) {
            pool.pending = pool.pending.saturating_sub(1);
        }
        self.prune(pool_key);
    }

    /// Turn a reservation into a live connection.
    ///
    /// Once shutdown has begun the record is handed back for closing.
    pub(crate) fn commit(
        &mut self,
        pool_key: &PoolKey,
        session_id: Option<&str>,
        record: ConnectionRecord,
    ) -> std::result::Result<PooledClient, ConnectionRecord> {
        if self.shutting_down {
            self.cancel_reservation(pool_key);
            return Err(record);
        }

        self.pending = self.pending.saturating_sub(1);
        let handle = record.handle();

        let pool = self.pools.entry(pool_key.clone()).or_default();
        pool.pending = pool.pending.saturating_sub(1);
        pool.records.push(record);
        if let Some(session_id) = session_id {
            pool.session = Some(session_id.to_string());
            self.sessions
                .entry(session_id.to_string())
                .or_default()
                .insert(pool_key.clone());
        }
        self.total += 1;

        Ok(handle)
    }

    /// Remove every idle connection unused for longer than `idle_timeout`
    pub(crate) fn drain_expired(&mut self, now: Instant, idle_timeout: Duration) -> Vec<ConnectionRecord> {
        let expired: Vec<(PoolKey, Arc<str>)> = self
            .pools
            .iter()
            .flat_map(|(pool_key, pool)| {
                pool.records
                    .iter()
                    .filter(|record| record.is_idle() && record.idle_for(now) > idle_timeout)
                    .map(move |record| (pool_key.clone(), Arc::clone(&record.instance_tag)))
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|(pool_key, instance_tag)| self.remove_record(&pool_key, &instance_tag))
            .collect()
    }

    /// Remove every pool registered to a session, active connections included
    pub(crate) fn drain_session(&mut self, session_id: &str) -> Vec<ConnectionRecord> {
        let Some(keys) = self.sessions.remove(session_id) else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        for pool_key in keys {
            let Some(pool) = self.pools.remove(&pool_key) else {
                continue;
            };
            for record in pool.records {
                if record.is_idle() {
                    self.idle.remove(&pool_key, &record.instance_tag);
                }
                drained.push(record);
            }
        }

        self.total = self.total.saturating_sub(drained.len());
        drained
    }

    /// Empty every registry and return all connections
    pub(crate) fn drain_all(&mut self) -> Vec<ConnectionRecord> {
        let drained: Vec<ConnectionRecord> = self
            .pools
            .drain()
            .flat_map(|(_, pool)| pool.records)
            .collect();

        self.idle.clear();
        self.sessions.clear();
        self.total = 0;
        drained
    }

    /// Reconcile the idle index with the true idle set.
    ///
    /// Returns the number of entries fixed; a nested call is a no-op.
    pub(crate) fn verify_idle_index(&mut self) -> usize {
        if self.repairing {
            return 0;
        }
        self.repairing = true;

        let fixed = self.idle.reconcile(
            self.pools
                .values()
                .flat_map(|pool| pool.records.iter())
                .filter(|record| record.is_idle()),
        );

        self.repairing = false;
        if fixed > 0 {
            self.repairs += fixed as u64;
            warn!(fixed, "Repaired idle index inconsistencies");
        }
        fixed
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let (active, idle) = self
            .pools
            .values()
            .flat_map(|pool| pool.records.iter())
            .fold((0, 0), |(active, idle), record| {
                if record.is_active {
                    (active + 1, idle)
                } else {
                    (active, idle + 1)
                }
            });

        PoolStats {
            total: self.total,
            active,
            idle,
            indexed: self.idle.len(),
            pools: self.pools.len(),
            sessions: self.sessions.len(),
            pending: self.pending,
            idle_index_repairs: self.repairs,
        }
    }

    pub(crate) fn pool_stats(&self) -> Vec<PoolKeyStats> {
        let mut stats: Vec<PoolKeyStats> = self
            .pools
            .iter()
            .map(|(pool_key, pool)| {
                let active = pool.records.iter().filter(|r| r.is_active).count();
                PoolKeyStats {
                    pool_key: pool_key.clone(),
                    active,
                    idle: pool.records.len() - active,
                    pending: pool.pending,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.pool_key.cmp(&b.pool_key));
        stats
    }

    #[cfg(test)]
    pub(crate) fn idle_index_mut(&mut self) -> &mut IdleIndex {
        &mut self.idle
    }

    #[cfg(test)]
    pub(crate) fn session_keys(&self, session_id: &str) -> Vec<PoolKey> {
        self.sessions
            .get(session_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}
