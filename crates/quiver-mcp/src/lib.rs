//! Pooled MCP (Model Context Protocol) client for Quiver.
//!
//! This crate connects to remote tool servers, discovers their tools and
//! invokes them, keeping a bounded pool of reusable sessions per server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpManager                                                 │
//! │  - Per-server pool of reusable sessions                     │
//! │  - acquire / release / invalidate, reconnect with backoff   │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpSession                                                 │
//! │  - Handshake, tools/list (cached), tools/call (deadline)    │
//! │  - Active health probes and passive error accounting        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpTransport                                               │
//! │  - HTTP POST, single JSON or line-framed event stream       │
//! │  - Stdio child process with Content-Length framing          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use quiver_mcp::{CallOutcome, McpManager, ServerDescriptor};
//! use serde_json::json;
//!
//! let manager = McpManager::default();
//! let search = ServerDescriptor::http("search", "https://tools.example.com/mcp")
//!     .with_header("Authorization", "Bearer token123");
//!
//! let session = manager.acquire(&search).await?;
//! for tool in session.list_tools(false).await?.iter() {
//!     println!("Tool: {} - {:?}", tool.name, tool.description);
//! }
//!
//! let mut print = |chunk: &serde_json::Value| println!("chunk: {chunk}");
//! let result = session
//!     .call_tool("search", json!({"query": "rust"}), Some(&mut print))
//!     .await;
//! println!("{}", serde_json::to_string(&CallOutcome::from_result(result))?);
//!
//! manager.release(&session, "search").await;
//! ```
//!
//! # Wire format
//!
//! Requests are JSON-RPC 2.0 envelopes POSTed to the server. Replies are
//! either one JSON document or a stream of frames:
//!
//! ```text
//! data: {"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"..."}]}}
//!
//! data: {"jsonrpc":"2.0","id":3,"result":{"content":[...]}}
//! ```
//!
//! The protocol flow is:
//! 1. Client sends `initialize` with capabilities
//! 2. Server responds with its capabilities (and possibly a session id)
//! 3. Client sends `notifications/initialized`
//! 4. Client can now call `tools/list` and `tools/call`

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export main types
pub use codec::{ChunkCallback, FrameDecoder, StreamAccumulator, ToolOutput};
pub use descriptor::{
    DescriptorExtensions, PoolSettings, ServerDescriptor, SessionSettings, TransportKind,
};
pub use error::{ErrorKind, McpError, Result};
pub use manager::{McpManager, PoolStats, ServerPoolStats};
pub use protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, RpcReply, ServerInfo, Tool, ToolInputSchema,
};
pub use session::{CallOutcome, McpSession, SessionId, SessionStatus};
pub use transport::{HealthProbe, McpTransport};
