//! Error types for MCP operations.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Message fragments that identify a broken connection.
///
/// Matched case-insensitively against error messages by
/// [`McpError::is_connection_error`].
const CONNECTION_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "reset",
    "refused",
    "not connected",
    "session",
    "transport",
    "connection closed",
    "broken pipe",
    "eof",
];

/// Coarse classification of an [`McpError`], as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Transport-level failure (connect, read, non-2xx status).
    Network,
    /// A deadline was exceeded.
    Timeout,
    /// The server answered with a JSON-RPC `error` object.
    Protocol,
    /// The session failed passive or active health checks.
    UnhealthySession,
    /// Connection attempts were exhausted.
    PoolExhausted,
    /// Invalid descriptor, disabled server or unusable transport settings.
    Config,
    /// The server replied with something that is not valid JSON-RPC.
    Decode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::UnhealthySession => "unhealthy-session",
            Self::PoolExhausted => "pool-exhausted",
            Self::Config => "config",
            Self::Decode => "decode",
        };
        f.write_str(s)
    }
}

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A deadline elapsed before the operation completed.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// What was being waited on (`tools/call`, `health probe`, ...).
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// The response was not a usable JSON-RPC document.
    #[error("malformed response: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has no live transport.
    #[error("session for '{server}' is not connected")]
    NotConnected {
        /// Server id.
        server: String,
    },

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session was marked unhealthy and must not be used.
    #[error("session for '{server}' is unhealthy: {reason}")]
    UnhealthySession {
        /// Server id.
        server: String,
        /// Why the session was excluded.
        reason: String,
    },

    /// A call was attempted on a session that is parked idle in the pool.
    #[error("session for '{server}' is idle in the pool; acquire it before calling")]
    SessionIdle {
        /// Server id.
        server: String,
    },

    /// Every connection attempt failed.
    #[error("could not connect to '{server}' after {attempts} attempts: {source}")]
    PoolExhausted {
        /// Server id.
        server: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<McpError>,
    },

    /// The server descriptor is disabled.
    #[error("server '{0}' is disabled")]
    ServerDisabled(String),

    /// The server descriptor cannot be used as given.
    #[error("invalid server descriptor: {0}")]
    InvalidDescriptor(String),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create an invalid descriptor error.
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_)
            | Self::Http { .. }
            | Self::Io(_)
            | Self::NotConnected { .. }
            | Self::ConnectionClosed => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ServerError { .. } => ErrorKind::Protocol,
            Self::Decode(_) | Self::Json(_) => ErrorKind::Decode,
            Self::UnhealthySession { .. } | Self::SessionIdle { .. } => {
                ErrorKind::UnhealthySession
            }
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::SpawnFailed(_) | Self::ServerDisabled(_) | Self::InvalidDescriptor(_) => {
                ErrorKind::Config
            }
        }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Protocol errors never are: the server understood the request and
    /// rejected it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::PoolExhausted { source, .. } => source.is_retryable(),
            other => matches!(other.kind(), ErrorKind::Network | ErrorKind::Timeout),
        }
    }

    /// Returns true if this error means the underlying connection is broken.
    ///
    /// Used by passive health accounting: such errors mark a session
    /// unhealthy immediately instead of waiting for the error threshold.
    pub fn is_connection_error(&self) -> bool {
        if matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        CONNECTION_PATTERNS.iter().any(|p| message.contains(p))
    }

    /// Returns true if the server says it is still finishing initialization.
    pub fn is_initialization_pending(&self) -> bool {
        self.to_string().to_lowercase().contains("initializ")
    }

    /// Returns true for an HTTP 405 (method not allowed).
    pub fn is_method_not_allowed(&self) -> bool {
        matches!(self, Self::Http { status: 405, .. })
    }

    /// The message to show a caller: the server-reported text for protocol
    /// errors, the display form for everything else.
    pub fn message(&self) -> String {
        match self {
            Self::ServerError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                operation: "HTTP request".to_string(),
                after: Duration::ZERO,
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}
