//! Error types for the Switchboard pool

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Switchboard
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session already holds its maximum number of pool keys and none of
    /// its pools has an idle connection to hand out
    #[error("Session connection limit ({limit}) reached for session '{session_id}'")]
    SessionQuotaExceeded {
        /// Session that hit the limit
        session_id: String,
        /// Configured `max_connections_per_session`
        limit: usize,
    },

    /// Per-(instance, server) pool is full and has no idle connection
    #[error("Connection limit ({limit}) reached for server '{server_name}' on instance '{instance_id}'")]
    ServerPoolExhausted {
        /// Gateway instance id
        instance_id: String,
        /// MCP server name
        server_name: String,
        /// Configured `max_connections_per_server`
        limit: usize,
    },

    /// System-wide connection ceiling reached and nothing is idle anywhere
    #[error("Global connection limit ({limit}) reached and no idle connection can be evicted")]
    GlobalPoolExhausted {
        /// Configured `max_total_connections`
        limit: usize,
    },

    /// Factory or transport connect failure
    #[error("Failed to create MCP connection: {0}")]
    ConnectionCreationFailed(String),

    /// Error reported by a client or transport collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::SessionQuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ServerPoolExhausted { .. } | Error::GlobalPoolExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::ConnectionCreationFailed(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is one of the pool quota rejections
    pub fn is_quota_error(&self) -> bool {
        matches!(
            self,
            Error::SessionQuotaExceeded { .. }
                | Error::ServerPoolExhausted { .. }
                | Error::GlobalPoolExhausted { .. }
        )
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }
}
