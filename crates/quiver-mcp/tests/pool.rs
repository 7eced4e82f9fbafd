//! Pool behaviour against a mock MCP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use quiver_mcp::{ErrorKind, McpError, McpManager, PoolSettings, SessionStatus};
use serde_json::json;
use wiremock::{MockServer, Request, ResponseTemplate};

use common::{
    count_calls, descriptor, rpc_error, rpc_method, start_mock, test_manager, test_pool,
    test_settings,
};

#[tokio::test]
async fn test_acquire_on_empty_pool_creates_one_session() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let session = manager.acquire(&desc).await.unwrap();

    assert_eq!(session.status(), SessionStatus::InUse);
    assert!(session.is_healthy());
    assert_eq!(count_calls(&server, "initialize").await, 1);
    // not pooled until released
    assert_eq!(manager.pool_size("mock"), 0);
}

#[tokio::test]
async fn test_release_pools_healthy_session_once() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let session = manager.acquire(&desc).await.unwrap();
    manager.release(&session, "mock").await;
    assert_eq!(manager.pool_size("mock"), 1);
    assert_eq!(session.status(), SessionStatus::Idle);

    // releasing again does not double-insert
    manager.release(&session, "mock").await;
    assert_eq!(manager.pool_size("mock"), 1);
}

#[tokio::test]
async fn test_acquire_reuses_idle_session() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let first = manager.acquire(&desc).await.unwrap();
    manager.release(&first, "mock").await;

    let second = manager.acquire(&desc).await.unwrap();
    assert_eq!(first.id(), second.id());
    assert!(second.is_in_use());
    assert_eq!(count_calls(&server, "initialize").await, 1);

    // an in-use pooled session is not handed out twice
    let third = manager.acquire(&desc).await.unwrap();
    assert_ne!(third.id(), second.id());
    assert_eq!(count_calls(&server, "initialize").await, 2);
}

#[tokio::test]
async fn test_failing_session_is_discarded_on_next_acquire() {
    let server = start_mock().await;
    rpc_method("tools/call")
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let session = manager.acquire(&desc).await.unwrap();
    manager.release(&session, "mock").await;
    let session = manager.acquire(&desc).await.unwrap();

    for _ in 0..3 {
        let err = session.call_tool("echo", json!({}), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
    assert!(!session.is_healthy());
    assert_eq!(session.consecutive_errors(), 3);

    let fresh = manager.acquire(&desc).await.unwrap();
    assert_ne!(fresh.id(), session.id());
    assert!(fresh.is_healthy());
    assert!(!session.is_connected());
    assert_eq!(manager.pool_size("mock"), 0);
}

#[tokio::test]
async fn test_protocol_errors_need_threshold() {
    let server = start_mock().await;
    rpc_method("tools/call")
        .respond_with(|req: &Request| rpc_error(req, -32602, "Invalid params"))
        .mount(&server)
        .await;
    let manager = test_manager();
    let session = manager.acquire(&descriptor(&server)).await.unwrap();

    for expected in 1..=2 {
        let err = session.call_tool("add", json!({}), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "Invalid params");
        assert_eq!(session.consecutive_errors(), expected);
        assert!(session.is_healthy());
    }

    session.call_tool("add", json!({}), None).await.unwrap_err();
    assert!(!session.is_healthy());

    // unhealthy sessions are destroyed on release
    manager.release(&session, "mock").await;
    assert_eq!(manager.pool_size("mock"), 0);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_success_resets_error_count() {
    let server = start_mock().await;
    rpc_method("tools/call")
        .respond_with(|req: &Request| rpc_error(req, -32602, "Invalid params"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    rpc_method("tools/call")
        .respond_with(|req: &Request| {
            common::rpc_result(req, json!({"content": [{"type": "text", "text": "done"}]}))
        })
        .mount(&server)
        .await;
    let manager = test_manager();
    let session = manager.acquire(&descriptor(&server)).await.unwrap();

    session.call_tool("echo", json!({}), None).await.unwrap_err();
    session.call_tool("echo", json!({}), None).await.unwrap_err();
    assert_eq!(session.consecutive_errors(), 2);

    session.call_tool("echo", json!({}), None).await.unwrap();
    assert_eq!(session.consecutive_errors(), 0);
    assert!(session.is_healthy());
}

#[tokio::test]
async fn test_full_pool_destroys_extra_sessions() {
    let server = start_mock().await;
    let pool = PoolSettings {
        max_size_per_server: 1,
        ..test_pool()
    };
    let manager = McpManager::new(pool, test_settings());
    let desc = descriptor(&server);

    let a = manager.acquire(&desc).await.unwrap();
    let b = manager.acquire(&desc).await.unwrap();
    assert_ne!(a.id(), b.id());

    manager.release(&a, "mock").await;
    manager.release(&b, "mock").await;

    assert_eq!(manager.pool_size("mock"), 1);
    assert!(a.is_connected());
    assert!(!b.is_connected());
}

#[tokio::test]
async fn test_idle_expired_session_is_replaced() {
    let server = start_mock().await;
    let pool = PoolSettings {
        idle_timeout: Duration::from_millis(50),
        ..test_pool()
    };
    let manager = McpManager::new(pool, test_settings());
    let desc = descriptor(&server);

    let first = manager.acquire(&desc).await.unwrap();
    manager.release(&first, "mock").await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let second = manager.acquire(&desc).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert!(!first.is_connected());
    assert_eq!(manager.pool_size("mock"), 0);
}

#[tokio::test]
async fn test_invalidate_removes_session() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let session = manager.acquire(&desc).await.unwrap();
    manager.release(&session, "mock").await;
    let session = manager.acquire(&desc).await.unwrap();
    assert_eq!(manager.pool_size("mock"), 1);

    manager.invalidate(&session, "mock").await;
    assert_eq!(manager.pool_size("mock"), 0);
    assert!(!session.is_healthy());
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_cleanup_sweeps_pool_and_shared() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let pooled = manager.acquire(&desc).await.unwrap();
    let spare = manager.acquire(&desc).await.unwrap();
    manager.release(&pooled, "mock").await;
    manager.release(&spare, "mock").await;
    let shared = manager.shared_connection(&desc).await.unwrap();
    assert_eq!(manager.stats().total_sessions(), 3);

    pooled.disconnect().await;
    shared.disconnect().await;

    assert_eq!(manager.cleanup().await, 2);
    let stats = manager.stats();
    assert_eq!(stats.servers["mock"].pooled, 1);
    assert!(!stats.servers["mock"].shared);
    assert_eq!(manager.cleanup().await, 0);
}

#[tokio::test]
async fn test_shared_connection_is_reused_while_healthy() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let first = manager.shared_connection(&desc).await.unwrap();
    let again = manager.shared_connection(&desc).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(manager.pool_size("mock"), 0);
    assert!(manager.stats().servers["mock"].shared);

    first.disconnect().await;
    let replaced = manager.shared_connection(&desc).await.unwrap();
    assert_ne!(replaced.id(), first.id());
    assert!(replaced.is_connected());
}

#[tokio::test]
async fn test_concurrent_shared_connection_hands_out_one_live_session() {
    let server = MockServer::start().await;
    rpc_method("initialize")
        .respond_with(|req: &Request| {
            common::rpc_result(
                req,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "slow-tools", "version": "0.1.0" }
                }),
            )
            .set_delay(Duration::from_millis(200))
        })
        .mount(&server)
        .await;
    rpc_method("notifications/initialized")
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    common::mount_tools(&server).await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let (a, b) = tokio::join!(
        manager.shared_connection(&desc),
        manager.shared_connection(&desc)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // both callers raced through a handshake; only one session survives
    assert!(a.is_connected());
    assert!(b.is_connected());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(count_calls(&server, "initialize").await, 2);

    let tools = a.list_tools(false).await.unwrap();
    assert!(!tools.is_empty());
    let cached = manager.shared_connection(&desc).await.unwrap();
    assert!(Arc::ptr_eq(&cached, &a));
    assert!(manager.stats().servers["mock"].shared);
}

#[tokio::test]
async fn test_reconnect_by_id_uses_cached_descriptor() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let first = manager.acquire(&desc).await.unwrap();
    let second = manager.reconnect_by_id("mock").await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(second.descriptor().url, desc.url);
}

#[tokio::test]
async fn test_handshake_rejection_is_not_retried() {
    let server = MockServer::start().await;
    rpc_method("initialize")
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;
    let manager = test_manager();

    let err = manager.acquire(&descriptor(&server)).await.unwrap_err();
    assert!(matches!(err, McpError::Http { status: 401, .. }));
    assert_eq!(count_calls(&server, "initialize").await, 1);
}

#[tokio::test]
async fn test_transient_handshake_failures_exhaust_pool() {
    let server = MockServer::start().await;
    rpc_method("initialize")
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let manager = test_manager();

    let err = manager.acquire(&descriptor(&server)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    match err {
        McpError::PoolExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, McpError::Http { status: 503, .. }));
        }
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
    assert_eq!(count_calls(&server, "initialize").await, 3);
}

#[tokio::test]
async fn test_transient_handshake_failure_recovers() {
    let server = MockServer::start().await;
    rpc_method("initialize")
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_handshake(&server).await;
    let manager = test_manager();

    let session = manager.acquire(&descriptor(&server)).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(count_calls(&server, "initialize").await, 2);
}

#[tokio::test]
async fn test_shutdown_disconnects_everything() {
    let server = start_mock().await;
    let manager = test_manager();
    let desc = descriptor(&server);

    let pooled = manager.acquire(&desc).await.unwrap();
    manager.release(&pooled, "mock").await;
    let shared = manager.shared_connection(&desc).await.unwrap();

    manager.shutdown().await;
    assert!(!pooled.is_connected());
    assert!(!shared.is_connected());
    assert_eq!(manager.stats().total_sessions(), 0);
}
