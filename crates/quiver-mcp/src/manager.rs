//! Connection pool and lifecycle manager for MCP sessions.
//!
//! The [`McpManager`] keeps a bounded list of reusable sessions per server.
//! [`McpManager::acquire`] pulls an idle healthy session or connects a new
//! one; [`McpManager::release`] returns it or destroys it. A session is
//! inserted into the pool only at release time, and only if it is still
//! connected and healthy.
//!
//! # Example
//!
//! ```rust,ignore
//! use quiver_mcp::{McpManager, ServerDescriptor};
//!
//! let manager = McpManager::default();
//! let search = ServerDescriptor::http("search", "https://tools.example.com/mcp");
//!
//! let session = manager.acquire(&search).await?;
//! let tools = session.list_tools(false).await?;
//! manager.release(&session, "search").await;
//! ```
//!
//! Every scan-and-mutate step runs under one lock that is never held across
//! an `.await`. Sessions chosen for destruction are collected inside the
//! critical section and disconnected after it ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::descriptor::{PoolSettings, ServerDescriptor, SessionSettings};
use crate::error::{McpError, Result};
use crate::session::{McpSession, SessionId};

#[derive(Debug)]
struct PoolEntry {
    session: Arc<McpSession>,
    created_at: Instant,
}

#[derive(Debug, Default)]
struct ManagerState {
    pools: HashMap<String, Vec<PoolEntry>>,
    shared: HashMap<String, Arc<McpSession>>,
    descriptors: HashMap<String, Arc<ServerDescriptor>>,
}

impl ManagerState {
    /// Stop tracking a session, wherever it is held.
    fn untrack(&mut self, server_id: &str, session_id: SessionId) {
        if let Some(entries) = self.pools.get_mut(server_id) {
            entries.retain(|e| e.session.id() != session_id);
        }
        if self
            .shared
            .get(server_id)
            .is_some_and(|s| s.id() == session_id)
        {
            self.shared.remove(server_id);
        }
    }
}

/// Per-server pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerPoolStats {
    /// Sessions tracked in the pool.
    pub pooled: usize,
    /// Pooled sessions available for reuse.
    pub idle: usize,
    /// Pooled sessions currently held by a caller.
    pub in_use: usize,
    /// Pooled sessions that are disconnected or unhealthy.
    pub unhealthy: usize,
    /// Whether a shared session exists.
    pub shared: bool,
    /// Age of the oldest pooled session, in seconds.
    pub oldest_secs: u64,
}

/// Snapshot of the whole manager, keyed by server id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Per-server counters.
    pub servers: BTreeMap<String, ServerPoolStats>,
}

impl PoolStats {
    /// Total sessions tracked, pooled and shared.
    pub fn total_sessions(&self) -> usize {
        self.servers
            .values()
            .map(|s| s.pooled + usize::from(s.shared))
            .sum()
    }
}

/// Pool of MCP sessions, keyed by server id.
pub struct McpManager {
    pool: PoolSettings,
    session: SessionSettings,
    state: parking_lot::Mutex<ManagerState>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new(PoolSettings::default(), SessionSettings::default())
    }
}

impl McpManager {
    /// Create an empty manager.
    pub fn new(pool: PoolSettings, session: SessionSettings) -> Self {
        Self {
            pool,
            session,
            state: parking_lot::Mutex::new(ManagerState::default()),
        }
    }

    /// Pool policy in effect.
    pub fn pool_settings(&self) -> &PoolSettings {
        &self.pool
    }

    /// Session policy handed to every new session.
    pub fn session_settings(&self) -> &SessionSettings {
        &self.session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Acquire / release
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a healthy in-use session for `descriptor`.
    ///
    /// Scans the pool newest-first, destroying disconnected, unhealthy and
    /// idle-expired entries on the way. Falls back to connecting a new
    /// session, which is not pooled until it is released.
    pub async fn acquire(&self, descriptor: &ServerDescriptor) -> Result<Arc<McpSession>> {
        if !descriptor.enabled {
            return Err(McpError::ServerDisabled(descriptor.id.clone()));
        }

        let now = Instant::now();
        let (chosen, doomed) = {
            let mut state = self.state.lock();
            remember(&mut state, descriptor);
            let entries = state.pools.entry(descriptor.id.clone()).or_default();

            let mut doomed = Vec::new();
            let mut chosen = None;
            let mut i = entries.len();
            while i > 0 {
                i -= 1;
                let session = entries[i].session.clone();
                if !session.is_connected() || !session.is_healthy() {
                    doomed.push(entries.remove(i).session);
                    continue;
                }
                if session.is_in_use() {
                    continue;
                }
                if session.idle_for(now) > self.pool.idle_timeout {
                    doomed.push(entries.remove(i).session);
                    continue;
                }
                session.mark_in_use();
                chosen = Some(session);
                break;
            }
            (chosen, doomed)
        };

        destroy_all(&descriptor.id, doomed, "stale").await;

        if let Some(session) = chosen {
            tracing::debug!(server = %descriptor.id, session = session.id(), "reusing pooled MCP session");
            return Ok(session);
        }

        tracing::debug!(server = %descriptor.id, "no idle MCP session, connecting");
        self.reconnect(descriptor).await
    }

    /// Hand a session back to the pool.
    ///
    /// Disconnected or unhealthy sessions are destroyed. Healthy ones are
    /// marked idle and pooled if there is room, destroyed otherwise.
    pub async fn release(&self, session: &Arc<McpSession>, server_id: &str) {
        if !session.is_connected() || !session.is_healthy() {
            self.state.lock().untrack(server_id, session.id());
            destroy(server_id, session, "released unhealthy").await;
            return;
        }

        session.mark_idle();
        let kept = {
            let mut state = self.state.lock();
            let max = self.pool.max_size_per_server;
            let entries = state.pools.entry(server_id.to_string()).or_default();
            if entries.iter().any(|e| e.session.id() == session.id()) {
                true
            } else if entries.len() < max {
                entries.push(PoolEntry {
                    session: session.clone(),
                    created_at: Instant::now(),
                });
                true
            } else {
                false
            }
        };

        if kept {
            tracing::debug!(server = %server_id, session = session.id(), "MCP session returned to pool");
        } else {
            destroy(server_id, session, "pool full").await;
        }
    }

    /// Force a session out of service.
    pub async fn invalidate(&self, session: &Arc<McpSession>, server_id: &str) {
        session.mark_unhealthy("invalidated");
        self.state.lock().untrack(server_id, session.id());
        destroy(server_id, session, "invalidated").await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect a brand-new session, retrying with linear backoff.
    ///
    /// Attempt `n` that fails with a retryable error waits `retry_delay * n`
    /// before the next. Non-retryable errors are returned at once; running
    /// out of attempts yields [`McpError::PoolExhausted`].
    pub async fn reconnect(&self, descriptor: &ServerDescriptor) -> Result<Arc<McpSession>> {
        if !descriptor.enabled {
            return Err(McpError::ServerDisabled(descriptor.id.clone()));
        }
        let descriptor = remember(&mut self.state.lock(), descriptor);

        let attempts = self.pool.reconnect_attempts.max(1);
        let mut attempt = 1;
        loop {
            let session = Arc::new(McpSession::new(descriptor.clone(), self.session.clone()));
            match session.connect().await {
                Ok(()) => {
                    session.mark_in_use();
                    tracing::info!(
                        server = %descriptor.id,
                        session = session.id(),
                        attempt,
                        "connected to MCP server"
                    );
                    return Ok(session);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(server = %descriptor.id, error = %e, "MCP connection failed");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    tracing::warn!(
                        server = %descriptor.id,
                        attempts,
                        error = %e,
                        "giving up connecting to MCP server"
                    );
                    return Err(McpError::PoolExhausted {
                        server: descriptor.id.clone(),
                        attempts,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.pool.retry_delay * attempt;
                    tracing::warn!(
                        server = %descriptor.id,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "MCP connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Reconnect using the descriptor last seen for `server_id`.
    pub async fn reconnect_by_id(&self, server_id: &str) -> Result<Arc<McpSession>> {
        let descriptor = self.descriptor(server_id).ok_or_else(|| {
            McpError::invalid_descriptor(format!("no descriptor known for '{}'", server_id))
        })?;
        self.reconnect(&descriptor).await
    }

    /// The long-lived shared session for a server.
    ///
    /// Returns the cached session while it is connected and passes a health
    /// check; otherwise replaces it with a freshly connected one.
    pub async fn shared_connection(&self, descriptor: &ServerDescriptor) -> Result<Arc<McpSession>> {
        if !descriptor.enabled {
            return Err(McpError::ServerDisabled(descriptor.id.clone()));
        }

        let existing = self.state.lock().shared.get(&descriptor.id).cloned();
        if let Some(session) = existing {
            if session.is_connected() && session.check_health().await {
                return Ok(session);
            }
            tracing::info!(server = %descriptor.id, session = session.id(), "shared MCP session is broken, reconnecting");
            self.invalidate(&session, &descriptor.id).await;
        }

        let session = self.reconnect(descriptor).await?;
        let (winner, loser) = {
            let mut state = self.state.lock();
            match state.shared.get(&descriptor.id) {
                Some(existing) if existing.is_connected() && existing.is_healthy() => {
                    (existing.clone(), Some(session))
                }
                _ => {
                    let stale = state.shared.insert(descriptor.id.clone(), session.clone());
                    (session, stale)
                }
            }
        };
        if let Some(loser) = loser {
            // a concurrent caller installed a healthy session first, or the
            // replaced entry is broken
            destroy(&descriptor.id, &loser, "superseded").await;
        }
        Ok(winner)
    }

    /// The descriptor last seen for `server_id`.
    pub fn descriptor(&self, server_id: &str) -> Option<Arc<ServerDescriptor>> {
        self.state.lock().descriptors.get(server_id).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Destroy every tracked session that is disconnected or unhealthy.
    ///
    /// Returns how many sessions were removed.
    pub async fn cleanup(&self) -> usize {
        let doomed: Vec<(String, Arc<McpSession>)> = {
            let mut state = self.state.lock();
            let mut doomed = Vec::new();
            for (server_id, entries) in state.pools.iter_mut() {
                let mut i = 0;
                while i < entries.len() {
                    let s = &entries[i].session;
                    if !s.is_connected() || !s.is_healthy() {
                        doomed.push((server_id.clone(), entries.remove(i).session));
                    } else {
                        i += 1;
                    }
                }
            }
            let broken: Vec<String> = state
                .shared
                .iter()
                .filter(|(_, s)| !s.is_connected() || !s.is_healthy())
                .map(|(id, _)| id.clone())
                .collect();
            for server_id in broken {
                if let Some(session) = state.shared.remove(&server_id) {
                    doomed.push((server_id, session));
                }
            }
            doomed
        };

        let removed = doomed.len();
        for (server_id, session) in doomed {
            destroy(&server_id, &session, "cleanup").await;
        }
        if removed > 0 {
            tracing::info!(removed, "MCP pool cleanup removed sessions");
        }
        removed
    }

    /// Number of sessions pooled for `server_id`.
    pub fn pool_size(&self, server_id: &str) -> usize {
        self.state.lock().pools.get(server_id).map_or(0, Vec::len)
    }

    /// Snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let state = self.state.lock();
        let mut stats = PoolStats::default();

        for (server_id, entries) in &state.pools {
            let s = stats.servers.entry(server_id.clone()).or_default();
            s.pooled = entries.len();
            for entry in entries {
                let session = &entry.session;
                if !session.is_connected() || !session.is_healthy() {
                    s.unhealthy += 1;
                } else if session.is_in_use() {
                    s.in_use += 1;
                } else {
                    s.idle += 1;
                }
                let age = now.saturating_duration_since(entry.created_at).as_secs();
                s.oldest_secs = s.oldest_secs.max(age);
            }
        }
        for server_id in state.shared.keys() {
            stats.servers.entry(server_id.clone()).or_default().shared = true;
        }
        stats
    }

    /// Disconnect every tracked session and forget all pools.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, Arc<McpSession>)> = {
            let mut state = self.state.lock();
            let mut sessions = Vec::new();
            for (server_id, entries) in state.pools.drain() {
                sessions.extend(entries.into_iter().map(|e| (server_id.clone(), e.session)));
            }
            sessions.extend(state.shared.drain());
            sessions
        };

        tracing::info!(sessions = sessions.len(), "shutting down MCP manager");
        for (server_id, session) in sessions {
            destroy(&server_id, &session, "shutdown").await;
        }
    }
}

fn remember(state: &mut ManagerState, descriptor: &ServerDescriptor) -> Arc<ServerDescriptor> {
    match state.descriptors.get(&descriptor.id) {
        Some(cached) if **cached == *descriptor => cached.clone(),
        _ => {
            let cached = Arc::new(descriptor.clone());
            state
                .descriptors
                .insert(descriptor.id.clone(), cached.clone());
            cached
        }
    }
}

async fn destroy(server_id: &str, session: &McpSession, reason: &str) {
    tracing::debug!(server = %server_id, session = session.id(), reason, "destroying MCP session");
    session.disconnect().await;
}

async fn destroy_all(server_id: &str, sessions: Vec<Arc<McpSession>>, reason: &str) {
    for session in sessions {
        destroy(server_id, &session, reason).await;
    }
}
