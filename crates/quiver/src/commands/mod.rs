//! CLI command handlers.

pub mod call;
pub mod health;
pub mod servers;
pub mod tools;

use std::time::Duration;

use anyhow::{Result, anyhow};

use quiver_config::{PoolSection, QuiverConfig, ServerEntry, TransportSetting};
use quiver_mcp::{McpManager, PoolSettings, ServerDescriptor, SessionSettings, TransportKind};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: QuiverConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Find a configured server by id.
    pub fn server(&self, id: &str) -> Result<&ServerEntry> {
        self.config.server(id).ok_or_else(|| {
            anyhow!(
                "server '{}' not found. Use 'quiver servers' to see configured servers.",
                id
            )
        })
    }

    /// Build a manager from the `[pool]` section.
    pub fn manager(&self) -> McpManager {
        let pool = self.config.pool_or_default();
        McpManager::new(pool_settings(&pool), session_settings(&pool))
    }
}

/// Turn a config entry into a descriptor.
pub fn descriptor(entry: &ServerEntry) -> ServerDescriptor {
    let transport = match entry.transport {
        TransportSetting::StreamingHttp => TransportKind::StreamingHttp,
        TransportSetting::PostingHttp => TransportKind::PostingHttp,
        TransportSetting::ProcessStdio => TransportKind::ProcessStdio,
    };

    let mut desc = match (&entry.url, &entry.command) {
        (_, Some(command)) if !transport.is_http() => ServerDescriptor::stdio(&entry.id, command),
        (url, _) => ServerDescriptor::http(&entry.id, url.clone().unwrap_or_default()),
    }
    .with_name(entry.display_name())
    .with_transport(transport)
    .with_enabled(entry.enabled)
    .with_sse_body(entry.sse_body)
    .with_tolerate_handshake_405(entry.tolerate_handshake_405);

    for (key, value) in &entry.headers {
        desc = desc.with_header(key, value);
    }
    for arg in &entry.args {
        desc = desc.with_arg(arg);
    }
    for (key, value) in &entry.env {
        desc = desc.with_env_var(key, value);
    }
    desc
}

/// Pool policy from the `[pool]` section.
pub fn pool_settings(pool: &PoolSection) -> PoolSettings {
    PoolSettings {
        max_size_per_server: pool.max_size_per_server,
        idle_timeout: Duration::from_secs(pool.idle_timeout_secs),
        reconnect_attempts: pool.reconnect_attempts,
        retry_delay: Duration::from_millis(pool.retry_delay_ms),
    }
}

/// Session policy from the `[pool]` section.
pub fn session_settings(pool: &PoolSection) -> SessionSettings {
    SessionSettings {
        call_timeout: Duration::from_secs(pool.call_timeout_secs),
        request_timeout: Duration::from_secs(pool.request_timeout_secs),
        health_timeout: Duration::from_secs(pool.health_timeout_secs),
        health_interval: Duration::from_secs(pool.health_interval_secs),
        tools_cache_ttl: Duration::from_secs(pool.tools_cache_ttl_secs),
        post_handshake_grace: Duration::from_millis(pool.post_handshake_grace_ms),
        error_threshold: pool.error_threshold,
        proxy_url: pool.proxy_url.clone(),
        ..SessionSettings::default()
    }
}

/// Truncate a string to a maximum length.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
