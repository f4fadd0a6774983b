//! Connection records and the handle lent to callers

use crate::client::{CreatedConnection, CredentialsCleanup, McpClient, Transport};
use crate::key::PoolKey;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::Result;
use tokio::time::{timeout, Instant};
use tracing::warn;

/// One live connection plus its bookkeeping
pub(crate) struct ConnectionRecord {
    pub(crate) client: Arc<dyn McpClient>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cleanup: Option<CredentialsCleanup>,
    pub(crate) pool_key: PoolKey,
    pub(crate) instance_tag: Arc<str>,
    pub(crate) last_used: Instant,
    pub(crate) is_active: bool,
}

impl ConnectionRecord {
    /// Wrap a freshly connected pair; new records start out active
    pub(crate) fn new(created: CreatedConnection, pool_key: PoolKey, instance_tag: String) -> Self {
        Self {
            client: created.client,
            transport: created.transport,
            cleanup: created.credentials_cleanup,
            pool_key,
            instance_tag: instance_tag.into(),
            last_used: Instant::now(),
            is_active: true,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.is_active
    }

    pub(crate) fn mark_active(&mut self, now: Instant) {
        self.is_active = true;
        self.last_used = now;
    }

    pub(crate) fn mark_idle(&mut self, now: Instant) {
        self.is_active = false;
        self.last_used = now;
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Handle lent to the caller
    pub(crate) fn handle(&self) -> PooledClient {
        PooledClient {
            client: Arc::clone(&self.client),
            pool_key: self.pool_key.clone(),
            instance_tag: Arc::clone(&self.instance_tag),
        }
    }

    /// Close client and transport, then run the cleanup callback.
    ///
    /// Every step runs even if an earlier one fails; failures are logged.
    pub(crate) async fn close(self, close_timeout: Duration) {
        let Self {
            client,
            transport,
            cleanup,
            pool_key,
            instance_tag,
            ..
        } = self;

        teardown(
            client.as_ref(),
            transport.as_ref(),
            cleanup,
            close_timeout,
            &pool_key,
            &instance_tag,
        )
        .await;
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("pool_key", &self.pool_key)
            .field("instance_tag", &self.instance_tag)
            .field("is_active", &self.is_active)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

/// Best-effort teardown of a client/transport pair and its cleanup callback
pub(crate) async fn teardown(
    client: &dyn McpClient,
    transport: &dyn Transport,
    cleanup: Option<CredentialsCleanup>,
    close_timeout: Duration,
    pool_key: &PoolKey,
    instance_tag: &str,
) {
    if let Err(message) = bounded(close_timeout, client.close()).await {
        warn!(%pool_key, instance_tag, error = %message, "Failed to close MCP client");
    }
    if let Err(message) = bounded(close_timeout, transport.close()).await {
        warn!(%pool_key, instance_tag, error = %message, "Failed to close transport");
    }
    if let Some(cleanup) = cleanup {
        if let Err(message) = bounded(close_timeout, cleanup()).await {
            warn!(%pool_key, instance_tag, error = %message, "Credentials cleanup failed");
        }
    }
}

async fn bounded<F>(limit: Duration, fut: F) -> std::result::Result<(), String>
where
    F: Future<Output = Result<()>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {limit:?}")),
    }
}

/// Client handle lent to a caller by [`SessionPool::get_connection`]
///
/// Dereferences to the underlying [`McpClient`]. Pass it back to
/// [`SessionPool::release_connection`] when done.
///
/// [`SessionPool::get_connection`]: crate::SessionPool::get_connection
/// [`SessionPool::release_connection`]: crate::SessionPool::release_connection
#[derive(Clone)]
pub struct PooledClient {
    client: Arc<dyn McpClient>,
    pool_key: PoolKey,
    instance_tag: Arc<str>,
}

impl PooledClient {
    /// Underlying client
    pub fn client(&self) -> &Arc<dyn McpClient> {
        &self.client
    }

    /// Pool the connection belongs to
    pub fn pool_key(&self) -> &PoolKey {
        &self.pool_key
    }

    /// Tag identifying the connection within its pool
    pub fn instance_tag(&self) -> &str {
        &self.instance_tag
    }
}

impl Deref for PooledClient {
    type Target = dyn McpClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("pool_key", &self.pool_key)
            .field("instance_tag", &self.instance_tag)
            .finish_non_exhaustive()
    }
}
