//! Wire types for the JSON-RPC 2.0 envelope and the MCP methods quiver uses.
//!
//! Requests, notifications and replies share one envelope shape; the
//! payloads of `initialize`, `tools/list` and `tools/call` are typed here so
//! the rest of the crate never probes raw JSON for them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{McpError, Result};

/// Value of the `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in the handshake and the version header.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the client.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake follow-up notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Tool discovery.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation.
    pub const TOOLS_CALL: &str = "tools/call";
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Outgoing call that expects a reply with the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Per-session, monotonically increasing.
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Fire-and-forget message; carries no `id` and gets no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The `error` member of a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    /// Used when a server sends a bare string instead of an error object.
    pub const INTERNAL_ERROR: i64 = -32603;
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::server_error(err.code, err.message, err.data)
    }
}

/// A decoded JSON-RPC reply.
///
/// Every response document is classified into exactly one of these before
/// anything else looks at it.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    /// The `result` member.
    Ok(Value),
    /// The `error` member.
    Protocol(JsonRpcError),
    /// Neither a result nor a well-formed error.
    Malformed(String),
}

impl RpcReply {
    /// Classify a parsed response document.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::Malformed("response is not a JSON object".to_string());
        };

        if let Some(error) = object.remove("error") {
            return match error {
                Value::String(message) => Self::Protocol(JsonRpcError {
                    code: JsonRpcError::INTERNAL_ERROR,
                    message,
                    data: None,
                }),
                other => match serde_json::from_value::<JsonRpcError>(other) {
                    Ok(err) => Self::Protocol(err),
                    Err(e) => Self::Malformed(format!("unreadable error object: {}", e)),
                },
            };
        }

        match object.remove("result") {
            Some(result) => Self::Ok(result),
            None => Self::Malformed("response carries neither result nor error".to_string()),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Protocol(err) => Err(err.into()),
            Self::Malformed(reason) => Err(McpError::decode(reason)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Body of the `initialize` request.
///
/// quiver only consumes tools, so it advertises no client capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Map<String, Value>,
    pub client_info: ServerInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Map::new(),
            client_info: ServerInfo {
                name: "quiver".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Name and version of one side of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// What the server answers to `initialize`. Everything is optional because
/// servers are lenient about it and so is the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    /// Kept opaque; quiver never negotiates features.
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Option<ServerInfo>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-schema-like description of a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Normally `"object"`.
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    /// Property schemas keyed by argument name.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Any other schema keywords, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_schema_type() -> String {
    "object".to_string()
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: Map::new(),
            required: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// One entry of a server's tool catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Servers that omit it get an empty object schema.
    #[serde(default)]
    pub input_schema: ToolInputSchema,
}

/// `tools/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// `tools/call` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}
