//! Stdio transport against the mock MCP server binary.

use std::sync::Arc;
use std::time::Duration;

use quiver_mcp::{
    CallOutcome, ErrorKind, McpManager, McpSession, PoolSettings, ServerDescriptor,
    SessionSettings, SessionStatus, ToolOutput,
};
use serde_json::json;

const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

fn settings() -> SessionSettings {
    SessionSettings {
        post_handshake_grace: Duration::ZERO,
        ..SessionSettings::default()
    }
}

fn mock(args: &[&str]) -> ServerDescriptor {
    args.iter()
        .fold(ServerDescriptor::stdio("mock", MOCK_SERVER), |desc, arg| {
            desc.with_arg(*arg)
        })
}

async fn connected(args: &[&str]) -> McpSession {
    let session = McpSession::new(Arc::new(mock(args)), settings());
    session.connect().await.unwrap();
    session
}

#[tokio::test]
async fn test_connect_and_list_tools() {
    let session = connected(&[]).await;

    let info = session.server_info().unwrap();
    assert_eq!(info.name, "mock-mcp-server");
    assert_eq!(info.version, "1.0.0");
    assert!(session.remote_session_id().is_none());

    let tools = session.list_tools(false).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "add"]);
}

#[tokio::test]
async fn test_call_tools() {
    let session = connected(&[]).await;

    let echoed = session
        .call_tool("echo", json!({"message": "hello"}), None)
        .await
        .unwrap();
    assert_eq!(echoed, ToolOutput::Text("hello".to_string()));

    let sum = session
        .call_tool("add", json!({"a": 2, "b": 40}), None)
        .await
        .unwrap();
    assert_eq!(sum, ToolOutput::Json(json!({"sum": 42.0})));
}

#[tokio::test]
async fn test_unknown_tool_is_protocol_error() {
    let session = connected(&[]).await;

    let outcome = CallOutcome::from_result(session.call_tool("nope", json!({}), None).await);
    match outcome {
        CallOutcome::Error {
            error,
            message,
            retryable,
        } => {
            assert_eq!(error, ErrorKind::Protocol);
            assert_eq!(message, "Unknown tool: nope");
            assert!(!retryable);
        }
        other => panic!("expected an error outcome, got {other:?}"),
    }
    // the transport is still usable
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_server_notifications_are_skipped() {
    let session = connected(&["--chatter"]).await;

    let tools = session.list_tools(false).await.unwrap();
    assert_eq!(tools.len(), 2);
    let output = session
        .call_tool("echo", json!({"message": "still here"}), None)
        .await
        .unwrap();
    assert_eq!(output, ToolOutput::Text("still here".to_string()));
}

#[tokio::test]
async fn test_health_check_uses_list_tools() {
    let session = connected(&[]).await;
    assert!(session.check_health().await);
    assert!(session.is_healthy());
}

#[tokio::test]
async fn test_exited_process_is_disconnected() {
    let session = connected(&["--exit-on", "crash"]).await;

    let err = session.call_tool("crash", json!({}), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(!session.is_healthy());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.is_connected());
    assert_eq!(session.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_pool_recycles_stdio_sessions() {
    let manager = McpManager::new(PoolSettings::default(), settings());
    let desc = mock(&[]);

    let session = manager.acquire(&desc).await.unwrap();
    session.list_tools(false).await.unwrap();
    manager.release(&session, "mock").await;

    let again = manager.acquire(&desc).await.unwrap();
    assert_eq!(again.id(), session.id());

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!again.is_connected());
}
