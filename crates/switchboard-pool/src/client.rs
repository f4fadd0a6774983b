//! Collaborator interfaces: MCP clients, transports and the connection factory
//!
//! The pool never speaks the MCP wire protocol itself. A
//! [`ConnectionFactory`] builds a client/transport pair, the pool connects
//! them, and later closes both when the connection is destroyed.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use switchboard_core::Result;

/// A live MCP protocol client
#[async_trait]
pub trait McpClient: Send + Sync + fmt::Debug {
    /// Connect the client over the given transport (performs the handshake)
    async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()>;

    /// Issue a lightweight protocol request (e.g. a ping or tool listing)
    async fn ping(&self) -> Result<()>;

    /// Close the client session
    async fn close(&self) -> Result<()>;
}

/// Transport carrying an MCP session (stdio, SSE, streamable HTTP, ...)
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Close the underlying transport
    async fn close(&self) -> Result<()>;
}

/// Teardown callback returned by the factory, e.g. to release credentials
pub type CredentialsCleanup = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Output of [`ConnectionFactory::create`]
pub struct CreatedConnection {
    /// Unconnected client
    pub client: Arc<dyn McpClient>,
    /// Transport the pool will connect the client over
    pub transport: Arc<dyn Transport>,
    /// Optional credential teardown run when the connection is destroyed
    pub credentials_cleanup: Option<CredentialsCleanup>,
}

impl CreatedConnection {
    /// Create a client/transport pair without a cleanup callback
    pub fn new(client: Arc<dyn McpClient>, transport: Arc<dyn Transport>) -> Self {
        Self {
            client,
            transport,
            credentials_cleanup: None,
        }
    }

    /// Attach a credential teardown callback
    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.credentials_cleanup = Some(Box::new(move || Box::pin(cleanup())));
        self
    }
}

impl fmt::Debug for CreatedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedConnection")
            .field("client", &self.client)
            .field("transport", &self.transport)
            .field("has_cleanup", &self.credentials_cleanup.is_some())
            .finish()
    }
}

/// Creates client/transport pairs for MCP servers
///
/// Implementations must return a transport the pool can connect; the pool
/// calls [`McpClient::connect`] itself.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Server connection settings, opaque to the pool
    type Config: Send + Sync + ?Sized;

    /// Build a new, not yet connected, client/transport pair
    async fn create(&self, config: &Self::Config) -> Result<CreatedConnection>;
}
