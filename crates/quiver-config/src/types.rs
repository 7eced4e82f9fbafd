//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [pool]                   # pool and session tunables
//! max_size_per_server = 10
//! call_timeout_secs = 90
//!
//! [[servers]]              # one entry per tool server
//! id = "search"
//! url = "https://tools.example.com/mcp"
//! headers = { Authorization = "Bearer ..." }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiverConfig {
    /// Pool and session tunables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSection>,

    /// Configured tool servers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerEntry>,
}

impl QuiverConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Servers are matched by id: a later entry replaces an earlier one in
    /// place, new ids are appended. A later `[pool]` replaces the earlier one.
    pub fn merge(&mut self, other: QuiverConfig) {
        if other.pool.is_some() {
            self.pool = other.pool;
        }

        for server in other.servers {
            match self.servers.iter_mut().find(|s| s.id == server.id) {
                Some(existing) => *existing = server,
                None => self.servers.push(server),
            }
        }
    }

    /// Check ids and per-transport requirements.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
        }
        Ok(())
    }

    /// Look up a server by id.
    pub fn server(&self, id: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// The pool section, or defaults when absent.
    pub fn pool_or_default(&self) -> PoolSection {
        self.pool.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Pool sizing, retry policy and session deadlines.
///
/// ```toml
/// [pool]
/// max_size_per_server = 10
/// idle_timeout_secs = 300
/// reconnect_attempts = 3
/// retry_delay_ms = 1000
/// call_timeout_secs = 90
/// proxy_url = "http://127.0.0.1:3001/proxy"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Maximum pooled sessions per server.
    pub max_size_per_server: usize,
    /// Idle sessions older than this are retired.
    pub idle_timeout_secs: u64,
    /// Connection attempts before giving up.
    pub reconnect_attempts: u32,
    /// Base backoff; attempt `n` waits `n` times this.
    pub retry_delay_ms: u64,
    /// Hard deadline for a tool call.
    pub call_timeout_secs: u64,
    /// Deadline for other requests.
    pub request_timeout_secs: u64,
    /// Deadline for the `/health` probe.
    pub health_timeout_secs: u64,
    /// Minimum spacing between active health checks.
    pub health_interval_secs: u64,
    /// Tool list cache lifetime.
    pub tools_cache_ttl_secs: u64,
    /// Pause after a successful handshake.
    pub post_handshake_grace_ms: u64,
    /// Consecutive failures that mark a session unhealthy.
    pub error_threshold: u32,
    /// Local proxy that requests are routed through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_size_per_server: 10,
            idle_timeout_secs: 300,
            reconnect_attempts: 3,
            retry_delay_ms: 1000,
            call_timeout_secs: 90,
            request_timeout_secs: 30,
            health_timeout_secs: 5,
            health_interval_secs: 30,
            tools_cache_ttl_secs: 300,
            post_handshake_grace_ms: 1000,
            error_threshold: 3,
            proxy_url: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportSetting {
    /// HTTP with incrementally decoded event-stream replies.
    #[default]
    StreamingHttp,
    /// HTTP with whole-body replies.
    PostingHttp,
    /// Child process over stdio.
    ProcessStdio,
}

impl TransportSetting {
    /// Returns true for the HTTP-based kinds.
    pub fn is_http(self) -> bool {
        !matches!(self, Self::ProcessStdio)
    }
}

/// Configuration for a single tool server.
///
/// ```toml
/// [[servers]]
/// id = "search"
/// name = "Web Search"
/// url = "https://tools.example.com/mcp"
/// headers = { Authorization = "Bearer token123" }
///
/// [[servers]]
/// id = "sqlite"
/// transport = "process-stdio"
/// command = "mcp-server-sqlite"
/// args = ["--db", "/path/to/db.sqlite"]
/// env = { DEBUG = "1" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique server id.
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Endpoint URL (HTTP transports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Transport kind.
    #[serde(default)]
    pub transport: TransportSetting,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra HTTP headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Decode every reply as an event stream.
    #[serde(default)]
    pub sse_body: bool,
    /// Treat a 405 during the handshake as a soft failure.
    #[serde(default = "default_true")]
    pub tolerate_handshake_405: bool,
    /// Command to spawn (stdio transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment for the command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ServerEntry {
    /// Create an entry for an HTTP server.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: Some(url.into()),
            transport: TransportSetting::StreamingHttp,
            enabled: true,
            headers: BTreeMap::new(),
            sse_body: false,
            tolerate_handshake_405: true,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Create an entry for a stdio server.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            url: None,
            transport: TransportSetting::ProcessStdio,
            command: Some(command.into()),
            ..Self::http(id, "")
        }
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a command argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Check the fields the transport needs.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("server id must not be empty".into()));
        }
        if self.transport.is_http() {
            if self.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "server '{}' uses an HTTP transport but has no url",
                    self.id
                )));
            }
        } else if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "server '{}' uses process-stdio but has no command",
                self.id
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[pool]
max_size_per_server = 4
call_timeout_secs = 120
proxy_url = "http://127.0.0.1:3001/proxy"

[[servers]]
id = "search"
name = "Web Search"
url = "https://tools.example.com/mcp"
headers = { Authorization = "Bearer token123" }
sse_body = true

[[servers]]
id = "sqlite"
transport = "process-stdio"
command = "mcp-server-sqlite"
args = ["--db", "/path/to/db.sqlite"]
env = { DEBUG = "1" }
enabled = false
tolerate_handshake_405 = false
"#;
        let config = QuiverConfig::from_toml(toml).unwrap();
        config.validate().unwrap();

        let pool = config.pool.as_ref().unwrap();
        assert_eq!(pool.max_size_per_server, 4);
        assert_eq!(pool.call_timeout_secs, 120);
        // unspecified keys keep their defaults
        assert_eq!(pool.idle_timeout_secs, 300);
        assert_eq!(pool.proxy_url.as_deref(), Some("http://127.0.0.1:3001/proxy"));

        let search = config.server("search").unwrap();
        assert_eq!(search.display_name(), "Web Search");
        assert_eq!(search.transport, TransportSetting::StreamingHttp);
        assert_eq!(search.headers["Authorization"], "Bearer token123");
        assert!(search.sse_body);
        assert!(search.enabled);
        assert!(search.tolerate_handshake_405);

        let sqlite = config.server("sqlite").unwrap();
        assert_eq!(sqlite.display_name(), "sqlite");
        assert_eq!(sqlite.transport, TransportSetting::ProcessStdio);
        assert_eq!(sqlite.command.as_deref(), Some("mcp-server-sqlite"));
        assert_eq!(sqlite.args, vec!["--db", "/path/to/db.sqlite"]);
        assert_eq!(sqlite.env["DEBUG"], "1");
        assert!(!sqlite.enabled);
        assert!(!sqlite.tolerate_handshake_405);
    }

    #[test]
    fn test_empty_config() {
        let config = QuiverConfig::from_toml("").unwrap();
        assert!(config.pool.is_none());
        assert!(config.servers.is_empty());
        assert_eq!(config.pool_or_default(), PoolSection::default());
    }

    #[test]
    fn test_unknown_transport_is_parse_error() {
        let toml = r#"
[[servers]]
id = "x"
transport = "carrier-pigeon"
"#;
        let err = QuiverConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_merge_replaces_by_id() {
        let mut base = QuiverConfig {
            pool: Some(PoolSection::default()),
            servers: vec![
                ServerEntry::http("a", "http://a/mcp"),
                ServerEntry::http("b", "http://b/mcp"),
            ],
        };
        let overlay = QuiverConfig {
            pool: Some(PoolSection {
                max_size_per_server: 2,
                ..PoolSection::default()
            }),
            servers: vec![
                ServerEntry::http("b", "http://b2/mcp"),
                ServerEntry::stdio("c", "tool-server"),
            ],
        };

        base.merge(overlay);
        assert_eq!(base.pool.as_ref().unwrap().max_size_per_server, 2);
        let ids: Vec<&str> = base.servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(base.server("b").unwrap().url.as_deref(), Some("http://b2/mcp"));
    }

    #[test]
    fn test_merge_keeps_pool_when_overlay_has_none() {
        let mut base = QuiverConfig {
            pool: Some(PoolSection {
                error_threshold: 5,
                ..PoolSection::default()
            }),
            servers: Vec::new(),
        };
        base.merge(QuiverConfig::new());
        assert_eq!(base.pool.unwrap().error_threshold, 5);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = QuiverConfig {
            pool: None,
            servers: vec![
                ServerEntry::http("a", "http://a/mcp"),
                ServerEntry::http("a", "http://other/mcp"),
            ],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server id 'a'"));
    }

    #[test]
    fn test_validate_transport_requirements() {
        let mut no_url = ServerEntry::http("a", "");
        no_url.url = None;
        assert!(matches!(no_url.validate(), Err(ConfigError::Invalid(_))));

        let mut no_command = ServerEntry::stdio("b", "cmd");
        no_command.command = None;
        assert!(no_command.validate().is_err());

        assert!(ServerEntry::http("", "http://x/mcp").validate().is_err());
        assert!(ServerEntry::stdio("ok", "cmd").with_arg("-v").validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_keeps_servers() {
        let config = QuiverConfig {
            pool: None,
            servers: vec![
                ServerEntry::http("search", "https://tools.example.com/mcp")
                    .with_header("Authorization", "Bearer t"),
                ServerEntry::stdio("local", "tool-server").with_enabled(false),
            ],
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("[[servers]]"));
        assert_eq!(QuiverConfig::from_toml(&text).unwrap(), config);
    }
}
