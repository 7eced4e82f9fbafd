//! A single logical connection to one tool server.
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──▶ connected(in-use) ⇄ connected(idle)
//!                                                 │
//!                                   health failure ▼
//!                                             unhealthy ──▶ destroyed by the pool
//! ```
//!
//! Sessions account for their own health: every failed request bumps a
//! consecutive-error counter and every success resets it. Connection-type
//! failures, or reaching the threshold, mark the session unhealthy, which the
//! pool respects by never handing it out again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::codec::{ChunkCallback, ToolOutput};
use crate::descriptor::{ServerDescriptor, SessionSettings};
use crate::error::{ErrorKind, McpError, Result};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, ServerInfo, Tool, methods,
};
use crate::transport::{HealthProbe, McpTransport};

/// Stable, process-unique session identifier.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Last "no /health endpoint" warning per server, shared by all sessions.
static MISSING_HEALTH_WARNINGS: OnceLock<parking_lot::Mutex<HashMap<String, Instant>>> =
    OnceLock::new();

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No transport.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and parked in the pool.
    Idle,
    /// Connected and held by a caller.
    InUse,
    /// Connected but excluded from reuse.
    Unhealthy,
}

/// Caller-facing result of a tool call.
///
/// Serialises as `{"ok": value}` or
/// `{"error": kind, "message": ..., "retryable": bool}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallOutcome {
    /// The call succeeded.
    Ok {
        /// Unwrapped tool output.
        ok: Value,
    },
    /// The call failed.
    Error {
        /// Error classification.
        error: ErrorKind,
        /// Human-readable message.
        message: String,
        /// Whether retrying may succeed.
        retryable: bool,
    },
}

impl CallOutcome {
    /// Fold a call result into an outcome.
    pub fn from_result(result: Result<ToolOutput>) -> Self {
        match result {
            Ok(output) => Self::Ok {
                ok: output.into_value(),
            },
            Err(e) => Self::Error {
                error: e.kind(),
                message: e.message(),
                retryable: e.is_retryable(),
            },
        }
    }

    /// True for a successful call.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[derive(Debug, Clone)]
struct CachedTools {
    tools: Arc<Vec<Tool>>,
    cached_at: Instant,
}

#[derive(Debug)]
struct SessionState {
    connecting: bool,
    connected: bool,
    in_use: bool,
    healthy: bool,
    consecutive_errors: u32,
    last_used_at: Instant,
    last_health_check_at: Option<Instant>,
    tools: Option<CachedTools>,
    server_info: Option<ServerInfo>,
}

/// One logical connection to one tool server.
pub struct McpSession {
    id: SessionId,
    descriptor: Arc<ServerDescriptor>,
    settings: SessionSettings,
    transport: parking_lot::Mutex<Option<Arc<McpTransport>>>,
    state: parking_lot::Mutex<SessionState>,
    connect_lock: tokio::sync::Mutex<()>,
    request_id: AtomicU64,
}

impl McpSession {
    /// Create a disconnected session.
    ///
    /// A session created directly is owned by its creator and starts
    /// in-use; sessions parked in a pool are idle until acquired.
    pub fn new(descriptor: Arc<ServerDescriptor>, settings: SessionSettings) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            descriptor,
            settings,
            transport: parking_lot::Mutex::new(None),
            state: parking_lot::Mutex::new(SessionState {
                connecting: false,
                connected: false,
                in_use: true,
                healthy: false,
                consecutive_errors: 0,
                last_used_at: Instant::now(),
                last_health_check_at: None,
                tools: None,
                server_info: None,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            request_id: AtomicU64::new(1),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Process-unique id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Id of the server this session talks to.
    pub fn server_id(&self) -> &str {
        &self.descriptor.id
    }

    /// The descriptor this session was created from.
    pub fn descriptor(&self) -> &Arc<ServerDescriptor> {
        &self.descriptor
    }

    /// Server info reported by the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.state.lock().server_info.clone()
    }

    /// Session id assigned by the server.
    pub fn remote_session_id(&self) -> Option<String> {
        self.transport.lock().as_ref().and_then(|t| t.session_id())
    }

    /// True while the transport is up.
    pub fn is_connected(&self) -> bool {
        let connected = self.state.lock().connected;
        connected && self.transport.lock().as_ref().is_some_and(|t| t.is_alive())
    }

    /// Current health flag.
    pub fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    /// True while held by a caller.
    pub fn is_in_use(&self) -> bool {
        self.state.lock().in_use
    }

    /// Failures since the last success.
    pub fn consecutive_errors(&self) -> u32 {
        self.state.lock().consecutive_errors
    }

    /// When the session last finished a request or changed hands.
    pub fn last_used_at(&self) -> Instant {
        self.state.lock().last_used_at
    }

    /// When the last active health check ran.
    pub fn last_health_check_at(&self) -> Option<Instant> {
        self.state.lock().last_health_check_at
    }

    /// How long the session has been unused.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at())
    }

    /// Lifecycle state.
    pub fn status(&self) -> SessionStatus {
        let alive = self.transport.lock().as_ref().is_some_and(|t| t.is_alive());
        let state = self.state.lock();
        if state.connecting {
            SessionStatus::Connecting
        } else if !state.connected || !alive {
            SessionStatus::Disconnected
        } else if !state.healthy {
            SessionStatus::Unhealthy
        } else if state.in_use {
            SessionStatus::InUse
        } else {
            SessionStatus::Idle
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect and perform the MCP handshake.
    ///
    /// No-op when already connected. A 405 during the handshake is tolerated
    /// when the descriptor allows it; the session then proceeds optimistically
    /// and later calls prove connectivity.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.state.lock().connecting = true;
        let result = self.open_and_handshake().await;
        self.state.lock().connecting = false;

        let (transport, handshake_completed) = result?;
        *self.transport.lock() = Some(transport);
        {
            let mut state = self.state.lock();
            state.connected = true;
            state.healthy = true;
            state.consecutive_errors = 0;
            state.last_used_at = Instant::now();
        }

        tracing::info!(
            server = %self.descriptor.id,
            session = self.id,
            handshake_completed,
            "MCP session connected"
        );

        if handshake_completed && !self.settings.post_handshake_grace.is_zero() {
            // some servers finish setup asynchronously after acknowledging
            tokio::time::sleep(self.settings.post_handshake_grace).await;
        }
        Ok(())
    }

    async fn open_and_handshake(&self) -> Result<(Arc<McpTransport>, bool)> {
        let transport = Arc::new(McpTransport::open(&self.descriptor, &self.settings)?);
        let timeout = self.settings.handshake_timeout;

        let outcome = match tokio::time::timeout(timeout, self.handshake(&transport)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::timeout("initialize", timeout)),
        };

        match outcome {
            Ok(info) => {
                if let Some(info) = &info {
                    tracing::debug!(
                        server = %self.descriptor.id,
                        remote = %info.name,
                        version = %info.version,
                        "MCP server initialized"
                    );
                }
                self.state.lock().server_info = info;
                Ok((transport, true))
            }
            Err(e)
                if e.is_method_not_allowed() && self.descriptor.extensions.tolerate_handshake_405 =>
            {
                tracing::warn!(
                    server = %self.descriptor.id,
                    error = %e,
                    "handshake rejected with 405; proceeding optimistically"
                );
                Ok((transport, false))
            }
            Err(e) => {
                transport.shutdown().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, transport: &McpTransport) -> Result<Option<ServerInfo>> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let request = JsonRpcRequest::new(self.next_request_id(), methods::INITIALIZE, Some(params));
        let result = transport.send(&request, None).await?;

        let info = match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => init.server_info,
            Err(e) => {
                tracing::debug!(server = %self.descriptor.id, error = %e, "unrecognised initialize result");
                None
            }
        };

        transport
            .notify(&JsonRpcNotification::new(methods::INITIALIZED, None))
            .await?;
        Ok(info)
    }

    /// Close the transport and forget cached tools. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let transport = self.transport.lock().take();
        let was_connected = {
            let mut state = self.state.lock();
            let was = state.connected;
            state.connected = false;
            state.tools = None;
            was
        };
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        if was_connected {
            tracing::debug!(server = %self.descriptor.id, session = self.id, "MCP session disconnected");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    /// List the server's tools, served from cache while younger than the TTL.
    pub async fn list_tools(&self, force_refresh: bool) -> Result<Arc<Vec<Tool>>> {
        self.ensure_callable()?;
        self.fetch_tools(force_refresh).await
    }

    /// Drop the cached tool list.
    pub fn invalidate_tools_cache(&self) {
        self.state.lock().tools = None;
    }

    async fn fetch_tools(&self, force_refresh: bool) -> Result<Arc<Vec<Tool>>> {
        if !force_refresh {
            let state = self.state.lock();
            if let Some(cached) = &state.tools
                && cached.cached_at.elapsed() < self.settings.tools_cache_ttl
            {
                tracing::debug!(server = %self.descriptor.id, "tool list served from cache");
                return Ok(cached.tools.clone());
            }
        }

        let attempts = self.settings.list_tools_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .request(methods::TOOLS_LIST, None, self.settings.request_timeout, None)
                .await
            {
                Ok(result) => {
                    let listed: ListToolsResult = serde_json::from_value(result)?;
                    let tools = Arc::new(listed.tools);
                    tracing::debug!(
                        server = %self.descriptor.id,
                        tool_count = tools.len(),
                        "listed MCP tools"
                    );
                    self.state.lock().tools = Some(CachedTools {
                        tools: tools.clone(),
                        cached_at: Instant::now(),
                    });
                    return Ok(tools);
                }
                Err(e) if attempt < attempts && e.is_initialization_pending() => {
                    tracing::debug!(
                        server = %self.descriptor.id,
                        attempt,
                        error = %e,
                        "server still initializing, retrying tools/list"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.settings.list_tools_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Invoke a tool.
    ///
    /// Streamed content items are passed to `on_chunk` in wire order; the
    /// final accumulated result is returned once the reply ends. The call is
    /// aborted with a timeout error after the configured call timeout.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<ToolOutput> {
        self.ensure_callable()?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self
            .request(
                methods::TOOLS_CALL,
                Some(params),
                self.settings.call_timeout,
                on_chunk,
            )
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            tracing::warn!(server = %self.descriptor.id, tool = %name, "tool call returned error");
        } else {
            tracing::debug!(server = %self.descriptor.id, tool = %name, "tool call succeeded");
        }
        Ok(ToolOutput::from_result(result))
    }

    /// Send one request under a deadline, with passive health accounting.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<Value> {
        let transport = self.transport.lock().clone().ok_or_else(|| McpError::NotConnected {
            server: self.descriptor.id.clone(),
        })?;
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);

        let outcome = match tokio::time::timeout(timeout, transport.send(&request, on_chunk)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::timeout(method, timeout)),
        };

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn ensure_callable(&self) -> Result<()> {
        let state = self.state.lock();
        if !state.in_use {
            return Err(McpError::SessionIdle {
                server: self.descriptor.id.clone(),
            });
        }
        if !state.connected {
            return Err(McpError::NotConnected {
                server: self.descriptor.id.clone(),
            });
        }
        Ok(())
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Actively check health; rate-limited to one probe per health interval.
    ///
    /// Prefers the server's `/health` endpoint. Servers without one are
    /// checked with a fresh `tools/list` instead. Never returns an error;
    /// the outcome is reflected in the health flag.
    pub async fn check_health(&self) -> bool {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if let Some(at) = state.last_health_check_at
                && now.saturating_duration_since(at) < self.settings.health_interval
            {
                return state.healthy;
            }
            state.last_health_check_at = Some(now);
        }

        let Some(transport) = self.transport.lock().clone() else {
            self.mark_unhealthy("not connected");
            return false;
        };
        if !self.is_connected() {
            self.mark_unhealthy("transport is down");
            return false;
        }

        match transport.probe_health(self.settings.health_timeout).await {
            HealthProbe::Healthy => {
                self.mark_healthy();
                true
            }
            HealthProbe::Unhealthy(reason) => {
                self.mark_unhealthy(&reason);
                false
            }
            HealthProbe::Unsupported => {
                if transport.is_http() {
                    self.warn_missing_health_endpoint();
                }
                match self.fetch_tools(true).await {
                    Ok(_) => {
                        self.mark_healthy();
                        true
                    }
                    Err(e) => {
                        self.mark_unhealthy(&e.to_string());
                        false
                    }
                }
            }
        }
    }

    /// Returns whether the warning was emitted; at most once per server per
    /// `missing_health_warn_interval`.
    pub(crate) fn warn_missing_health_endpoint(&self) -> bool {
        let warnings = MISSING_HEALTH_WARNINGS.get_or_init(Default::default);
        let now = Instant::now();
        let mut last = warnings.lock();
        let due = last.get(&self.descriptor.id).is_none_or(|at| {
            now.saturating_duration_since(*at) >= self.settings.missing_health_warn_interval
        });
        if due {
            last.insert(self.descriptor.id.clone(), now);
            tracing::warn!(
                server = %self.descriptor.id,
                "server has no /health endpoint; using tools/list as health signal"
            );
        }
        due
    }

    /// Passive accounting for a successful call.
    pub(crate) fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_errors = 0;
        state.healthy = true;
        state.last_used_at = Instant::now();
    }

    /// Passive accounting for a failed call.
    pub(crate) fn record_failure(&self, error: &McpError) {
        let mut state = self.state.lock();
        state.consecutive_errors += 1;
        state.last_used_at = Instant::now();

        let threshold_reached = state.consecutive_errors >= self.settings.error_threshold;
        if state.healthy && (threshold_reached || error.is_connection_error()) {
            state.healthy = false;
            tracing::warn!(
                server = %self.descriptor.id,
                session = self.id,
                consecutive_errors = state.consecutive_errors,
                error = %error,
                "MCP session marked unhealthy"
            );
        }
    }

    pub(crate) fn mark_healthy(&self) {
        let mut state = self.state.lock();
        state.healthy = true;
        state.consecutive_errors = 0;
    }

    pub(crate) fn mark_unhealthy(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.healthy {
            tracing::warn!(server = %self.descriptor.id, session = self.id, reason, "MCP session marked unhealthy");
        }
        state.healthy = false;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pool bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn mark_in_use(&self) {
        let mut state = self.state.lock();
        state.in_use = true;
        state.last_used_at = Instant::now();
    }

    pub(crate) fn mark_idle(&self) {
        let mut state = self.state.lock();
        state.in_use = false;
        state.last_used_at = Instant::now();
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("id", &self.id)
            .field("server", &self.descriptor.id)
            .field("status", &self.status())
            .field("consecutive_errors", &self.consecutive_errors())
            .finish()
    }
}
