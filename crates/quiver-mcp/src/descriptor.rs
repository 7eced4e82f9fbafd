//! Server descriptors and client tunables.
//!
//! A [`ServerDescriptor`] is supplied by the caller and never mutated by the
//! crate. [`SessionSettings`] and [`PoolSettings`] hold the timing policy for
//! sessions and the pool respectively.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{McpError, Result};

/// Path suffixes stripped from a server URL before appending `/health`.
const TOOL_PATH_SUFFIXES: &[&str] = &["mcp", "sse", "messages", "rpc"];

/// How the client talks to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// HTTP POST whose reply may be a server-push stream, decoded as it arrives.
    #[default]
    StreamingHttp,
    /// HTTP POST whose reply is read in full before decoding.
    PostingHttp,
    /// A spawned child process speaking Content-Length framed JSON-RPC.
    ProcessStdio,
}

impl TransportKind {
    /// Returns true for the HTTP-based kinds.
    pub fn is_http(self) -> bool {
        matches!(self, Self::StreamingHttp | Self::PostingHttp)
    }
}

/// Optional behaviour switches for a single server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorExtensions {
    /// Decode the reply as an event stream regardless of its `Content-Type`.
    pub sse_body: bool,
    /// Treat an HTTP 405 during the handshake as a soft failure.
    pub tolerate_handshake_405: bool,
}

impl Default for DescriptorExtensions {
    fn default() -> Self {
        Self {
            sse_body: false,
            tolerate_handshake_405: true,
        }
    }
}

/// Immutable description of one tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Unique server id; pool key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Endpoint URL (HTTP kinds).
    pub url: Option<String>,
    /// Transport kind.
    pub transport: TransportKind,
    /// Disabled servers are refused by the manager.
    pub enabled: bool,
    /// Extra request headers, e.g. `Authorization`.
    pub headers: Vec<(String, String)>,
    /// Behaviour switches.
    pub extensions: DescriptorExtensions,
    /// Command to spawn (stdio kind).
    pub command: Option<String>,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Environment variables for the command.
    pub env: Vec<(String, String)>,
}

impl ServerDescriptor {
    /// Describe a streaming HTTP server.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: Some(url.into()),
            transport: TransportKind::StreamingHttp,
            enabled: true,
            headers: Vec::new(),
            extensions: DescriptorExtensions::default(),
            command: None,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Describe a server spoken to over a child process's stdio.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: None,
            transport: TransportKind::ProcessStdio,
            enabled: true,
            headers: Vec::new(),
            extensions: DescriptorExtensions::default(),
            command: Some(command.into()),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the transport kind.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Enable or disable the server.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Force event-stream decoding of replies.
    pub fn with_sse_body(mut self, sse_body: bool) -> Self {
        self.extensions.sse_body = sse_body;
        self
    }

    /// Control whether a 405 during the handshake is tolerated.
    pub fn with_tolerate_handshake_405(mut self, tolerate: bool) -> Self {
        self.extensions.tolerate_handshake_405 = tolerate;
        self
    }

    /// Add a command argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable for the command.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Check that the descriptor is usable for its transport kind.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(McpError::invalid_descriptor("server id is empty"));
        }
        match self.transport {
            TransportKind::StreamingHttp | TransportKind::PostingHttp => {
                self.endpoint_url()?;
            }
            TransportKind::ProcessStdio => {
                if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(McpError::invalid_descriptor(format!(
                        "server '{}' uses process-stdio but has no command",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse the endpoint URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            McpError::invalid_descriptor(format!("server '{}' has no URL", self.id))
        })?;
        Url::parse(raw).map_err(|e| {
            McpError::invalid_descriptor(format!("server '{}' has invalid URL: {}", self.id, e))
        })
    }

    /// URL of the out-of-band health endpoint.
    ///
    /// The tool path suffix (`/mcp`, `/sse`, ...) is stripped from the
    /// endpoint URL and `/health` appended.
    pub fn health_url(&self) -> Result<Url> {
        let mut url = self.endpoint_url()?;
        let mut segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        if segments
            .last()
            .is_some_and(|last| TOOL_PATH_SUFFIXES.contains(&last.as_str()))
        {
            segments.pop();
        }
        segments.push("health".to_string());
        url.set_path(&format!("/{}", segments.join("/")));
        url.set_query(None);
        Ok(url)
    }
}

/// Timing and accounting policy for a single session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Hard deadline for `tools/call`.
    pub call_timeout: Duration,
    /// Deadline for other requests (`tools/list`, notifications).
    pub request_timeout: Duration,
    /// Deadline for the whole handshake.
    pub handshake_timeout: Duration,
    /// Deadline for the `/health` probe.
    pub health_timeout: Duration,
    /// Minimum spacing between active health checks.
    pub health_interval: Duration,
    /// Age after which the cached tool list is refetched.
    pub tools_cache_ttl: Duration,
    /// Pause after a successful handshake.
    pub post_handshake_grace: Duration,
    /// Consecutive failures that mark a session unhealthy.
    pub error_threshold: u32,
    /// Attempts for `tools/list`.
    pub list_tools_attempts: u32,
    /// Delay before retrying `tools/list` on a still-initializing server.
    pub list_tools_retry_delay: Duration,
    /// Minimum spacing between "no /health endpoint" warnings per server.
    pub missing_health_warn_interval: Duration,
    /// Local proxy that all HTTP requests are routed through.
    pub proxy_url: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(90),
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            tools_cache_ttl: Duration::from_secs(5 * 60),
            post_handshake_grace: Duration::from_secs(1),
            error_threshold: 3,
            list_tools_attempts: 2,
            list_tools_retry_delay: Duration::from_secs(1),
            missing_health_warn_interval: Duration::from_secs(5 * 60),
            proxy_url: None,
        }
    }
}

/// Sizing and reconnection policy for the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Maximum pooled sessions per server.
    pub max_size_per_server: usize,
    /// Idle sessions older than this are retired on acquire.
    pub idle_timeout: Duration,
    /// Connection attempts before giving up.
    pub reconnect_attempts: u32,
    /// Base delay; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size_per_server: 10,
            idle_timeout: Duration::from_secs(5 * 60),
            reconnect_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_descriptor_builder() {
        let desc = ServerDescriptor::http("search", "https://tools.example.com/mcp")
            .with_name("Web Search")
            .with_header("Authorization", "Bearer token123")
            .with_sse_body(true);

        assert_eq!(desc.id, "search");
        assert_eq!(desc.name, "Web Search");
        assert!(desc.transport.is_http());
        assert!(desc.enabled);
        assert!(desc.extensions.sse_body);
        assert!(desc.extensions.tolerate_handshake_405);
        assert_eq!(
            desc.headers,
            vec![("Authorization".to_string(), "Bearer token123".to_string())]
        );
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_stdio_descriptor_builder() {
        let desc = ServerDescriptor::stdio("sqlite", "mcp-server-sqlite")
            .with_arg("--db")
            .with_arg("/tmp/db.sqlite")
            .with_env_var("DEBUG", "1");
        assert_eq!(desc.transport, TransportKind::ProcessStdio);
        assert_eq!(desc.args, vec!["--db", "/tmp/db.sqlite"]);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        let mut desc = ServerDescriptor::http("x", "not a url");
        assert!(desc.validate().is_err());

        desc.url = None;
        assert!(desc.validate().is_err());

        let desc = ServerDescriptor::stdio("y", "  ");
        assert!(desc.validate().is_err());

        let desc = ServerDescriptor::http("", "http://localhost/mcp");
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_health_url_strips_tool_suffix() {
        let desc = ServerDescriptor::http("a", "http://localhost:8080/mcp");
        assert_eq!(
            desc.health_url().unwrap().as_str(),
            "http://localhost:8080/health"
        );

        let desc = ServerDescriptor::http("b", "https://host/api/v2/mcp/?token=1");
        assert_eq!(
            desc.health_url().unwrap().as_str(),
            "https://host/api/v2/health"
        );

        let desc = ServerDescriptor::http("c", "https://host/tools");
        assert_eq!(
            desc.health_url().unwrap().as_str(),
            "https://host/tools/health"
        );
    }

    #[test]
    fn test_transport_kind_serde() {
        let kind: TransportKind = serde_json::from_str("\"posting-http\"").unwrap();
        assert_eq!(kind, TransportKind::PostingHttp);
        assert_eq!(
            serde_json::to_string(&TransportKind::ProcessStdio).unwrap(),
            "\"process-stdio\""
        );
    }

    #[test]
    fn test_default_settings() {
        let session = SessionSettings::default();
        assert_eq!(session.call_timeout, Duration::from_secs(90));
        assert_eq!(session.health_timeout, Duration::from_secs(5));
        assert_eq!(session.tools_cache_ttl, Duration::from_secs(300));
        assert_eq!(session.error_threshold, 3);

        let pool = PoolSettings::default();
        assert_eq!(pool.max_size_per_server, 10);
        assert_eq!(pool.reconnect_attempts, 3);
        assert_eq!(pool.idle_timeout, Duration::from_secs(300));
    }
}
