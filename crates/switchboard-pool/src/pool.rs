//! Session-aware MCP connection pool

use crate::client::{ConnectionFactory, CreatedConnection};
use crate::key::{self, PoolKey};
use crate::reaper;
use crate::record::{teardown, ConnectionRecord, PooledClient};
use crate::session_lock::SessionLocks;
use crate::state::{AcquireTarget, Plan, PoolState, Release};
use crate::stats::{PoolKeyStats, PoolStats};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use switchboard_config::PoolConfig;
use switchboard_core::{Error, Result};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Connection pool for MCP server clients
///
/// Connections are partitioned by pool key: `(instance, server)` and, when
/// `session_pool_sync` is enabled, the caller's session. Acquisitions for the
/// same session are serialized; quotas are checked per session, per pool
/// key and globally, in that order.
pub struct SessionPool<F: ConnectionFactory> {
    config: PoolConfig,
    factory: Arc<F>,
    state: Mutex<PoolState>,
    session_locks: SessionLocks,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> SessionPool<F> {
    /// Create a new pool. The idle reaper is not started.
    pub fn new(config: PoolConfig, factory: Arc<F>) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(PoolState::new()),
            session_locks: SessionLocks::new(),
            reaper: Mutex::new(None),
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool key a request for these arguments maps to
    pub fn pool_key(&self, instance_id: &str, server_name: &str, session_id: Option<&str>) -> PoolKey {
        PoolKey::new(instance_id, server_name, self.isolated(session_id))
    }

    fn isolated<'a>(&self, session_id: Option<&'a str>) -> Option<&'a str> {
        session_id.filter(|_| self.config.session_pool_sync)
    }

    /// Acquire a connection to `server_name` on `instance_id`.
    ///
    /// Reuses an idle connection when quotas allow, otherwise creates one
    /// through the factory. Fails with a quota error or
    /// [`Error::ConnectionCreationFailed`].
    pub async fn get_connection(
        &self,
        instance_id: &str,
        server_name: &str,
        connection_config: &F::Config,
        session_id: Option<&str>,
    ) -> Result<PooledClient> {
        let _session_guard = match session_id {
            Some(session_id) => Some(self.session_locks.acquire(session_id).await),
            None => None,
        };

        let isolated_session = self.isolated(session_id);
        let pool_key = PoolKey::new(instance_id, server_name, isolated_session);
        let target = AcquireTarget {
            instance_id,
            server_name,
            pool_key: &pool_key,
            session_id: isolated_session,
        };

        let plan = self
            .state
            .lock()
            .plan_acquisition(target, &self.config, Instant::now())?;

        let evicted = match plan {
            Plan::Reuse(client) => return Ok(client),
            Plan::Create { evicted } => evicted,
        };
        let reservation = Reservation {
            state: &self.state,
            pool_key: &pool_key,
            armed: true,
        };

        if let Some(record) = evicted {
            record.close(self.config.close_timeout).await;
        }

        let record = self
            .establish(instance_id, server_name, &pool_key, connection_config)
            .await?;

        match reservation.commit(isolated_session, record) {
            Ok(client) => {
                debug!(
                    %pool_key,
                    instance_tag = client.instance_tag(),
                    session_id,
                    "Created new MCP connection"
                );
                Ok(client)
            }
            Err(record) => {
                record.close(self.config.close_timeout).await;
                Err(Error::Internal("pool is shutting down".to_string()))
            }
        }
    }

    /// Create and connect a client, tearing it down again if connect fails
    async fn establish(
        &self,
        instance_id: &str,
        server_name: &str,
        pool_key: &PoolKey,
        connection_config: &F::Config,
    ) -> Result<ConnectionRecord> {
        let deadline = Instant::now() + self.config.connect_timeout;

        let created = match timeout_at(deadline, self.factory.create(connection_config)).await {
            Ok(Ok(created)) => created,
            Ok(Err(e)) => {
                warn!(%pool_key, error = %e, "Connection factory failed");
                return Err(Error::ConnectionCreationFailed(e.to_string()));
            }
            Err(_) => {
                let e = self.connect_timed_out();
                warn!(%pool_key, error = %e, "Connection factory timed out");
                return Err(Error::ConnectionCreationFailed(e.to_string()));
            }
        };

        let instance_tag = key::instance_tag(instance_id, server_name);
        let connected = timeout_at(
            deadline,
            created.client.connect(Arc::clone(&created.transport)),
        )
        .await;

        let failure = match connected {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(self.connect_timed_out()),
        };

        if let Some(e) = failure {
            warn!(%pool_key, %instance_tag, error = %e, "MCP connect failed, tearing down");
            let CreatedConnection {
                client,
                transport,
                credentials_cleanup,
            } = created;
            teardown(
                client.as_ref(),
                transport.as_ref(),
                credentials_cleanup,
                self.config.close_timeout,
                pool_key,
                &instance_tag,
            )
            .await;
            return Err(Error::ConnectionCreationFailed(e.to_string()));
        }

        Ok(ConnectionRecord::new(created, pool_key.clone(), instance_tag))
    }

    fn connect_timed_out(&self) -> Error {
        Error::Timeout(format!(
            "connection not established within {:?}",
            self.config.connect_timeout
        ))
    }

    /// Hand a connection back to the pool.
    ///
    /// Releasing an unknown or already idle connection is a no-op.
    pub fn release_connection(
        &self,
        instance_id: &str,
        server_name: &str,
        client: &PooledClient,
        session_id: Option<&str>,
    ) {
        let pool_key = self.pool_key(instance_id, server_name, session_id);
        let now = Instant::now();

        let outcome = {
            let mut state = self.state.lock();
            match state.release(&pool_key, client.instance_tag(), now) {
                // Reused across pools while the session was at its quota
                Release::Unknown if client.pool_key() != &pool_key => {
                    state.release(client.pool_key(), client.instance_tag(), now)
                }
                outcome => outcome,
            }
        };

        match outcome {
            Release::Released => {
                debug!(pool_key = %client.pool_key(), instance_tag = client.instance_tag(), "Released connection");
            }
            Release::AlreadyIdle => {
                debug!(pool_key = %client.pool_key(), instance_tag = client.instance_tag(), "Connection already idle");
            }
            Release::Unknown => {
                debug!(%pool_key, instance_tag = client.instance_tag(), "Release of unknown connection ignored");
            }
        }
    }

    /// Destroy every connection opened in a session's pools.
    ///
    /// Waits for the session's in-flight acquisition first. Only has an
    /// effect when session isolation is enabled.
    pub async fn cleanup_session(&self, session_id: &str) {
        let _session_guard = self.session_locks.acquire(session_id).await;

        let drained = self.state.lock().drain_session(session_id);
        if drained.is_empty() {
            debug!(session_id, "No connections to clean up for session");
            return;
        }

        let closed = drained.len();
        self.close_all(drained).await;
        info!(session_id, closed, "Cleaned up session connections");
    }

    /// Ping the server over `client`; any error or timeout is unhealthy
    pub async fn is_connection_healthy(&self, client: &PooledClient) -> bool {
        match timeout(self.config.health_check_timeout, client.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(pool_key = %client.pool_key(), error = %e, "Health check failed");
                false
            }
            Err(_) => {
                debug!(pool_key = %client.pool_key(), "Health check timed out");
                false
            }
        }
    }

    /// Close connections idle for longer than `idle_timeout`.
    ///
    /// When nothing expired the idle index is reconciled instead. Returns
    /// the number of connections closed.
    pub async fn reap_idle(&self) -> usize {
        let expired = self
            .state
            .lock()
            .drain_expired(Instant::now(), self.config.idle_timeout);

        let reaped = expired.len();
        if reaped > 0 {
            self.close_all(expired).await;
            info!(reaped, "Reaped idle connections");
        } else {
            let fixed = self.state.lock().verify_idle_index();
            debug!(fixed, "Idle index verified");
        }
        reaped
    }

    /// Start the background idle reaper. Calling it again while the reaper
    /// runs has no effect.
    pub fn start_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if self.state.lock().is_shutting_down() {
            return;
        }

        *slot = Some(reaper::spawn(Arc::downgrade(self), self.config.cleanup_interval));
    }

    /// Whether the background reaper is running
    pub fn reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Shut the pool down: stop the reaper, wait for in-flight session
    /// acquisitions and close every connection.
    ///
    /// New acquisitions fail once this has started. Later calls are no-ops.
    pub async fn cleanup(&self) {
        let first = self.state.lock().begin_shutdown();
        if !first {
            debug!("Connection pool already shut down");
            return;
        }
        info!("Shutting down connection pool");

        let reaper = self.reaper.lock().take();
        if let Some(handle) = reaper {
            handle.abort();
        }

        self.session_locks.wait_all().await;

        let drained = self.state.lock().drain_all();
        let closed = drained.len();
        self.close_all(drained).await;
        info!(closed, "Connection pool shut down");
    }

    async fn close_all(&self, records: Vec<ConnectionRecord>) {
        let close_timeout = self.config.close_timeout;
        join_all(records.into_iter().map(|record| record.close(close_timeout))).await;
    }

    /// Live connections across all pools
    pub fn total_connections(&self) -> usize {
        self.state.lock().total()
    }

    /// Snapshot of pool-wide counters
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats()
    }

    /// Per pool key counters, ordered by key
    pub fn pool_stats(&self) -> Vec<PoolKeyStats> {
        self.state.lock().pool_stats()
    }

    /// Log pool-wide counters and one line per pool key
    pub fn log_stats(&self) {
        let (stats, pools) = {
            let state = self.state.lock();
            (state.stats(), state.pool_stats())
        };

        info!(
            total = stats.total,
            active = stats.active,
            idle = stats.idle,
            pools = stats.pools,
            sessions = stats.sessions,
            pending = stats.pending,
            idle_index_repairs = stats.idle_index_repairs,
            "Connection pool stats"
        );
        for pool in pools {
            info!(
                pool_key = %pool.pool_key,
                active = pool.active,
                idle = pool.idle,
                pending = pool.pending,
                "Pool"
            );
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for SessionPool<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Creation slot held while a new connection is being established.
///
/// Dropping it without committing, on error or cancellation, gives the
/// slot back.
struct Reservation<'a> {
    state: &'a Mutex<PoolState>,
    pool_key: &'a PoolKey,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(
        mut self,
        session_id: Option<&str>,
        record: ConnectionRecord,
    ) -> std::result::Result<PooledClient, ConnectionRecord> {
        self.armed = false;
        self.state.lock().commit(self.pool_key, session_id, record)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().cancel_reservation(self.pool_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFactory;
    use std::time::Duration;
    use switchboard_config::ConfigBuilder;

    fn pool_with(config: PoolConfig) -> (Arc<SessionPool<MockFactory>>, Arc<MockFactory>) {
        let factory = Arc::new(MockFactory::new());
        let pool = Arc::new(SessionPool::new(config, Arc::clone(&factory)));
        (pool, factory)
    }

    fn isolated_config() -> PoolConfig {
        PoolConfig {
            session_pool_sync: true,
            ..PoolConfig::default()
        }
    }

    fn assert_invariants(pool: &SessionPool<MockFactory>) {
        let stats = pool.stats();
        assert_eq!(stats.total, stats.active + stats.idle);
        assert_eq!(stats.indexed, stats.idle);
        assert_eq!(stats.idle_index_repairs, 0);
    }

    #[tokio::test]
    async fn test_release_then_reacquire_reuses_connection() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let first = pool.get_connection("inst", "github", &(), None).await.unwrap();
        assert_eq!(factory.clients()[0].connect_count(), 1);
        pool.release_connection("inst", "github", &first, None);

        let second = pool.get_connection("inst", "github", &(), None).await.unwrap();
        assert_eq!(first.instance_tag(), second.instance_tag());
        assert_eq!(factory.create_count(), 1);
        assert_eq!(pool.total_connections(), 1);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_active_connections_are_never_shared() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let a = pool.get_connection("inst", "github", &(), None).await.unwrap();
        let b = pool.get_connection("inst", "github", &(), None).await.unwrap();

        assert_ne!(a.instance_tag(), b.instance_tag());
        assert_eq!(factory.create_count(), 2);
        assert_eq!(pool.stats().active, 2);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (pool, _factory) = pool_with(PoolConfig::default());

        let client = pool.get_connection("inst", "github", &(), None).await.unwrap();
        pool.release_connection("inst", "github", &client, None);
        let once = pool.stats();
        pool.release_connection("inst", "github", &client, None);

        assert_eq!(pool.stats(), once);
        assert_eq!(once.idle, 1);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_release_of_unknown_connection_is_noop() {
        let (pool, _factory) = pool_with(PoolConfig::default());
        let (other, _) = pool_with(PoolConfig::default());

        let foreign = other.get_connection("inst", "github", &(), None).await.unwrap();
        pool.release_connection("inst", "github", &foreign, None);

        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn test_session_cap_enforced() {
        let config = PoolConfig {
            max_connections_per_session: 2,
            ..isolated_config()
        };
        let (pool, factory) = pool_with(config);

        let a = pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        let _b = pool.get_connection("inst", "b", &(), Some("s1")).await.unwrap();

        let err = pool
            .get_connection("inst", "c", &(), Some("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionQuotaExceeded { limit: 2, .. }));

        pool.release_connection("inst", "a", &a, Some("s1"));
        let reused = pool.get_connection("inst", "c", &(), Some("s1")).await.unwrap();
        assert_eq!(reused.instance_tag(), a.instance_tag());
        assert_eq!(factory.create_count(), 2);

        // Released under the requested server, found under its own pool
        pool.release_connection("inst", "c", &reused, Some("s1"));
        assert_eq!(pool.stats().idle, 1);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_other_sessions_unaffected_by_session_cap() {
        let config = PoolConfig {
            max_connections_per_session: 1,
            ..isolated_config()
        };
        let (pool, _factory) = pool_with(config);

        pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        pool.get_connection("inst", "b", &(), Some("s2")).await.unwrap();

        assert_eq!(pool.stats().sessions, 2);
    }

    #[tokio::test]
    async fn test_session_at_cap_cannot_grow_held_pool() {
        let config = PoolConfig {
            max_connections_per_session: 2,
            ..isolated_config()
        };
        let (pool, factory) = pool_with(config);

        let a = pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        let _b = pool.get_connection("inst", "b", &(), Some("s1")).await.unwrap();

        let err = pool
            .get_connection("inst", "a", &(), Some("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionQuotaExceeded { ref session_id, limit: 2 } if session_id == "s1"));
        assert_eq!(factory.create_count(), 2);
        assert_eq!(pool.total_connections(), 2);

        pool.release_connection("inst", "a", &a, Some("s1"));
        let again = pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        assert_eq!(again.instance_tag(), a.instance_tag());
        assert_eq!(factory.create_count(), 2);
        assert_invariants(&pool);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_cap_forces_reuse_past_idle_timeout() {
        let config = ConfigBuilder::new()
            .max_connections_per_server(1)
            .idle_timeout(Duration::from_secs(1))
            .build()
            .unwrap()
            .pool;
        let (pool, factory) = pool_with(config);

        let client = pool.get_connection("inst", "github", &(), None).await.unwrap();
        pool.release_connection("inst", "github", &client, None);
        tokio::time::advance(Duration::from_secs(10)).await;

        let again = pool.get_connection("inst", "github", &(), None).await.unwrap();
        assert_eq!(again.instance_tag(), client.instance_tag());
        assert_eq!(factory.create_count(), 1);

        let err = pool
            .get_connection("inst", "github", &(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerPoolExhausted { ref server_name, limit: 1, .. } if server_name == "github"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_pressure_evicts_oldest_idle() {
        let config = PoolConfig {
            max_connections_per_server: 2,
            max_total_connections: 3,
            idle_timeout: Duration::from_millis(1000),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);

        let a = pool.get_connection("inst", "srv1", &(), None).await.unwrap();
        let _b = pool.get_connection("inst", "srv1", &(), None).await.unwrap();
        assert_eq!(pool.total_connections(), 2);

        pool.release_connection("inst", "srv1", &a, None);
        tokio::time::advance(Duration::from_millis(10)).await;

        let _c = pool.get_connection("inst", "srv2", &(), None).await.unwrap();
        assert_eq!(pool.total_connections(), 3);

        let _d = pool.get_connection("inst", "srv3", &(), None).await.unwrap();
        assert_eq!(pool.total_connections(), 3);
        assert_eq!(factory.clients()[0].close_count(), 1);
        assert_eq!(factory.transports()[0].close_count(), 1);
        assert_eq!(factory.cleanup_count(), 1);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_global_cap_without_idle_fails() {
        let config = PoolConfig {
            max_total_connections: 1,
            ..PoolConfig::default()
        };
        let (pool, _factory) = pool_with(config);

        let _held = pool.get_connection("inst", "a", &(), None).await.unwrap();
        let err = pool.get_connection("inst", "b", &(), None).await.unwrap_err();
        assert!(matches!(err, Error::GlobalPoolExhausted { limit: 1 }));
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_closes_expired_connections() {
        let config = PoolConfig {
            idle_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);

        let idle = pool.get_connection("inst", "a", &(), None).await.unwrap();
        let _busy = pool.get_connection("inst", "a", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &idle, None);

        assert_eq!(pool.reap_idle().await, 0);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(pool.reap_idle().await, 1);

        let stats = pool.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(factory.cleanup_count(), 1);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_reap_idle_repairs_index_when_nothing_expired() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let idle = pool.get_connection("inst", "a", &(), None).await.unwrap();
        let busy = pool.get_connection("inst", "a", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &idle, None);

        {
            let mut state = pool.state.lock();
            let index = state.idle_index_mut();
            index.clear();
            index.insert_raw(crate::idle_index::IdleEntry {
                pool_key: busy.pool_key().clone(),
                instance_tag: Arc::from(busy.instance_tag()),
                last_used: Instant::now(),
            });
        }

        assert_eq!(pool.reap_idle().await, 0);

        let stats = pool.stats();
        assert_eq!(stats.idle_index_repairs, 2);
        assert_eq!(stats.indexed, stats.idle);
        assert_eq!(stats.idle, 1);
        assert_eq!(factory.cleanup_count(), 0);

        // The repaired entry is the one reused next
        let again = pool.get_connection("inst", "a", &(), None).await.unwrap();
        assert_eq!(again.instance_tag(), idle.instance_tag());
        assert_eq!(factory.create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_reclaims_in_background() {
        let config = PoolConfig {
            idle_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(2),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);
        pool.start_reaper();
        pool.start_reaper();
        assert!(pool.reaper_running());

        let client = pool.get_connection("inst", "a", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &client, None);

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(pool.total_connections(), 0);
        assert_eq!(factory.cleanup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_tolerates_close_failures() {
        let config = PoolConfig {
            idle_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);
        factory.set_fail_close(true);

        let client = pool.get_connection("inst", "a", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &client, None);
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(pool.reap_idle().await, 1);
        assert_eq!(pool.total_connections(), 0);
        assert_eq!(factory.transports()[0].close_count(), 1);
        assert_eq!(factory.cleanup_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_session_destroys_all_session_pools() {
        let (pool, factory) = pool_with(isolated_config());

        let a = pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        let _b = pool.get_connection("inst", "b", &(), Some("s1")).await.unwrap();
        let _other = pool.get_connection("inst", "a", &(), Some("s2")).await.unwrap();
        pool.release_connection("inst", "a", &a, Some("s1"));

        pool.cleanup_session("s1").await;

        let stats = pool.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.pools, 1);
        assert_eq!(stats.sessions, 1);
        assert_eq!(factory.cleanup_count(), 2);
        assert_eq!(factory.clients()[0].close_count(), 1);
        assert_eq!(factory.clients()[1].close_count(), 1);
        assert_eq!(factory.clients()[2].close_count(), 0);
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn test_cleanup_session_without_isolation_keeps_shared_pool() {
        let (pool, _factory) = pool_with(PoolConfig::default());

        pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        pool.cleanup_session("s1").await;

        assert_eq!(pool.total_connections(), 1);
        assert!(pool.pool_key("inst", "a", Some("s1")).is_shared());
    }

    #[tokio::test]
    async fn test_factory_failure_is_wrapped() {
        let (pool, factory) = pool_with(PoolConfig::default());
        factory.set_fail_create(true);

        let err = pool.get_connection("inst", "a", &(), None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionCreationFailed(ref msg) if msg.contains("mock factory failure")));

        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.pools, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_tears_down_partial_connection() {
        let (pool, factory) = pool_with(isolated_config());
        factory.set_fail_connect(true);

        let err = pool
            .get_connection("inst", "a", &(), Some("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionCreationFailed(_)));

        assert_eq!(factory.clients()[0].close_count(), 1);
        assert_eq!(factory.transports()[0].close_count(), 1);
        assert_eq!(factory.cleanup_count(), 1);
        assert_eq!(pool.stats(), PoolStats::default());

        // A failed attempt does not block the session
        factory.set_fail_connect(false);
        assert!(pool.get_connection("inst", "a", &(), Some("s1")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_factory_times_out() {
        let config = PoolConfig {
            connect_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);
        factory.set_create_delay(Some(Duration::from_secs(5)));

        let err = pool.get_connection("inst", "a", &(), None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionCreationFailed(ref msg) if msg.contains("timed out")));
        assert_eq!(pool.stats().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquisition_returns_reservation() {
        let (pool, factory) = pool_with(PoolConfig::default());
        factory.set_create_delay(Some(Duration::from_secs(10)));

        let attempt = tokio::time::timeout(
            Duration::from_secs(1),
            pool.get_connection("inst", "a", &(), None),
        )
        .await;
        assert!(attempt.is_err());

        let stats = pool.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.pools, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_session_acquisitions_are_serialized() {
        let (pool, factory) = pool_with(isolated_config());
        factory.set_create_delay(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let (a, b) = tokio::join!(
            pool.get_connection("inst", "a", &(), Some("s1")),
            pool.get_connection("inst", "b", &(), Some("s1")),
        );
        assert!(a.is_ok() && b.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));

        let started = Instant::now();
        let (c, d) = tokio::join!(
            pool.get_connection("inst", "a", &(), Some("s2")),
            pool.get_connection("inst", "a", &(), Some("s3")),
        );
        assert!(c.is_ok() && d.is_ok());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_shared_acquisitions_respect_server_cap() {
        let config = PoolConfig {
            max_connections_per_server: 1,
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);
        factory.set_create_delay(Some(Duration::from_millis(50)));

        let (a, b) = tokio::join!(
            pool.get_connection("inst", "a", &(), None),
            pool.get_connection("inst", "a", &(), None),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(factory.create_count(), 1);
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check() {
        let config = PoolConfig {
            health_check_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        };
        let (pool, factory) = pool_with(config);
        let client = pool.get_connection("inst", "a", &(), None).await.unwrap();

        assert!(pool.is_connection_healthy(&client).await);

        factory.clients()[0].set_healthy(false);
        assert!(!pool.is_connection_healthy(&client).await);

        factory.clients()[0].set_healthy(true);
        factory.clients()[0].set_hang_ping(true);
        assert!(!pool.is_connection_healthy(&client).await);
        assert_eq!(factory.clients()[0].ping_count(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_closes_everything_and_rejects_new_work() {
        let (pool, factory) = pool_with(isolated_config());
        pool.start_reaper();

        let a = pool.get_connection("inst", "a", &(), Some("s1")).await.unwrap();
        pool.get_connection("inst", "b", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &a, Some("s1"));

        pool.cleanup().await;

        assert!(!pool.reaper_running());
        assert_eq!(pool.stats(), PoolStats::default());
        assert_eq!(factory.cleanup_count(), 2);

        let err = pool.get_connection("inst", "a", &(), None).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        pool.cleanup().await;
        assert_eq!(factory.cleanup_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_during_creation_discards_new_connection() {
        let (pool, factory) = pool_with(PoolConfig::default());
        factory.set_create_delay(Some(Duration::from_millis(100)));

        let acquire = pool.get_connection("inst", "a", &(), None);
        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pool.cleanup().await;
        };
        let (result, ()) = tokio::join!(acquire, shutdown);

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(factory.cleanup_count(), 1);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn test_log_stats_and_pool_stats() {
        let (pool, _factory) = pool_with(PoolConfig::default());
        let a = pool.get_connection("inst", "a", &(), None).await.unwrap();
        pool.get_connection("inst", "b", &(), None).await.unwrap();
        pool.release_connection("inst", "a", &a, None);

        let pools = pool.pool_stats();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].pool_key, pool.pool_key("inst", "a", None));
        assert_eq!(pools[0].idle, 1);
        assert_eq!(pools[1].active, 1);
        assert_eq!(pools[1].total(), 1);

        pool.log_stats();
    }
}
