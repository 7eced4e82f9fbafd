//! Common test utilities for the wiremock-backed integration tests.

#![allow(dead_code)]

use std::time::Duration;

use quiver_mcp::{McpManager, PoolSettings, ServerDescriptor, SessionSettings};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockBuilder, MockServer, Request, ResponseTemplate};

/// Session id handed out by [`mount_handshake`].
pub const SESSION_ID: &str = "sess-42";

/// Session settings with the waits shrunk for tests.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        call_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
        post_handshake_grace: Duration::ZERO,
        list_tools_retry_delay: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

/// Pool settings with short retry delays.
pub fn test_pool() -> PoolSettings {
    PoolSettings {
        retry_delay: Duration::from_millis(10),
        ..PoolSettings::default()
    }
}

/// A manager wired with [`test_pool`] and [`test_settings`].
pub fn test_manager() -> McpManager {
    McpManager::new(test_pool(), test_settings())
}

/// Descriptor pointing at the mock server's `/mcp` endpoint.
pub fn descriptor(server: &MockServer) -> ServerDescriptor {
    ServerDescriptor::http("mock", format!("{}/mcp", server.uri()))
}

/// The JSON-RPC id of an incoming request.
pub fn request_id(req: &Request) -> Value {
    req.body_json::<Value>()
        .ok()
        .and_then(|body| body.get("id").cloned())
        .unwrap_or(Value::Null)
}

/// A JSON reply carrying `result` for the request's id.
pub fn rpc_result(req: &Request, result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": request_id(req),
        "result": result,
    }))
}

/// A JSON reply carrying a JSON-RPC error for the request's id.
pub fn rpc_error(req: &Request, code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": request_id(req),
        "error": { "code": code, "message": message },
    }))
}

/// An event-stream reply with one `data:` frame per result.
pub fn rpc_stream(req: &Request, results: &[Value]) -> ResponseTemplate {
    let id = request_id(req);
    let body: String = results
        .iter()
        .map(|result| {
            let frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
            format!("data: {}\n\n", frame)
        })
        .collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// Matches POSTs whose JSON-RPC method is `name`.
pub fn rpc_method(name: &str) -> MockBuilder {
    Mock::given(method("POST")).and(body_partial_json(json!({ "method": name })))
}

/// Mount `initialize` (assigning [`SESSION_ID`]) and the `initialized`
/// notification.
pub async fn mount_handshake(server: &MockServer) {
    rpc_method("initialize")
        .respond_with(|req: &Request| {
            rpc_result(
                req,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mock-tools", "version": "1.2.3" }
                }),
            )
            .insert_header("mcp-session-id", SESSION_ID)
        })
        .mount(server)
        .await;

    rpc_method("notifications/initialized")
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

/// The tool list served by [`mount_tools`].
pub fn sample_tools() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echo back the input",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }
            },
            {
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "number" },
                        "b": { "type": "number" }
                    },
                    "required": ["a", "b"]
                }
            }
        ]
    })
}

/// Mount `tools/list` answering with [`sample_tools`].
pub async fn mount_tools(server: &MockServer) {
    rpc_method("tools/list")
        .respond_with(|req: &Request| rpc_result(req, sample_tools()))
        .mount(server)
        .await;
}

/// Start a mock server with the handshake and `tools/list` mounted.
pub async fn start_mock() -> MockServer {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    mount_tools(&server).await;
    server
}

/// Number of received requests whose JSON-RPC method is `name`.
pub async fn count_calls(server: &MockServer, name: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| {
            req.body_json::<Value>()
                .ok()
                .and_then(|body| body.get("method").and_then(Value::as_str).map(str::to_string))
                .as_deref()
                == Some(name)
        })
        .count()
}
