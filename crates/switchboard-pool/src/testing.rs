//! Mock collaborators for tests
//!
//! Counting, fault-injectable implementations of [`McpClient`],
//! [`Transport`] and [`ConnectionFactory`]. Enabled in unit tests and for
//! downstream crates through the `testing` feature.

use crate::client::{ConnectionFactory, CreatedConnection, McpClient, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{Error, Result};

/// Mock MCP client
#[derive(Debug, Default)]
pub struct MockClient {
    connects: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    unhealthy: AtomicBool,
    hang_ping: AtomicBool,
}

impl MockClient {
    /// Create a healthy mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of connect calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Get number of ping calls
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Get number of close calls
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make `connect` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `close` fail
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Make `ping` succeed or fail
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Make `ping` never complete
    pub fn set_hang_ping(&self, hang: bool) {
        self.hang_ping.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl McpClient for MockClient {
    async fn connect(&self, _transport: Arc<dyn Transport>) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock handshake rejected".to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.hang_ping.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock server unreachable".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock close failed".to_string()));
        }
        Ok(())
    }
}

/// Mock transport
#[derive(Debug, Default)]
pub struct MockTransport {
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of close calls
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make `close` fail
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock transport close failed".to_string()));
        }
        Ok(())
    }
}

/// Mock connection factory
///
/// Every created connection carries a cleanup callback that bumps
/// [`MockFactory::cleanup_count`], so tests can check that each connection
/// was torn down exactly once.
#[derive(Debug, Default)]
pub struct MockFactory {
    creates: AtomicUsize,
    cleanups: Arc<AtomicUsize>,
    clients: Mutex<Vec<Arc<MockClient>>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    fail_create: AtomicBool,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
}

impl MockFactory {
    /// Create a factory producing healthy connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of create calls, failed ones included
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Get number of cleanup callbacks that ran
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Clients handed out so far, in creation order
    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().clone()
    }

    /// Transports handed out so far, in creation order
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().clone()
    }

    /// Make `create` fail before producing a client
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Produce clients whose `connect` fails
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Produce clients and transports whose `close` fails
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` inside every `create`
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock() = delay;
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Config = ();

    async fn create(&self, _config: &()) -> Result<CreatedConnection> {
        self.creates.fetch_add(1, Ordering::SeqCst);

        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock factory failure".to_string()));
        }

        let fail_close = self.fail_close.load(Ordering::SeqCst);
        let client = Arc::new(MockClient::new());
        client.set_fail_connect(self.fail_connect.load(Ordering::SeqCst));
        client.set_fail_close(fail_close);
        let transport = Arc::new(MockTransport::new());
        transport.set_fail_close(fail_close);

        self.clients.lock().push(Arc::clone(&client));
        self.transports.lock().push(Arc::clone(&transport));

        let cleanups = Arc::clone(&self.cleanups);
        Ok(CreatedConnection::new(client, transport).with_cleanup(move || async move {
            cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}
