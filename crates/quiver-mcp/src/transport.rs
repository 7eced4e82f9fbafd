//! Transport layer for MCP communication.
//!
//! Remote servers are reached with HTTP POST; the reply is either one JSON
//! document or an event stream (see [`crate::codec`]). Local servers are
//! spawned as child processes and spoken to with Content-Length framing over
//! stdio.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use url::Url;

use crate::codec::{self, ChunkCallback, FrameDecoder, StreamAccumulator};
use crate::descriptor::{ServerDescriptor, SessionSettings, TransportKind};
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, MCP_PROTOCOL_VERSION, RpcReply};

/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the server-assigned session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header naming the real endpoint when routing through a proxy.
pub const TARGET_URL_HEADER: &str = "x-target-url";

/// Accept value advertising both reply shapes.
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Largest stdio frame body accepted from a child process.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Outcome of an out-of-band health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    /// The endpoint reported healthy.
    Healthy,
    /// The endpoint failed or reported unhealthy.
    Unhealthy(String),
    /// The server has no health endpoint (404/405, or no HTTP at all).
    Unsupported,
}

/// Transport for communicating with an MCP server.
pub enum McpTransport {
    /// HTTP transport - communicates via HTTP POST requests.
    Http(HttpTransport),
    /// Stdio transport - communicates with a child process via stdin/stdout.
    Stdio(StdioTransport),
}

impl McpTransport {
    /// Open the transport described by `descriptor`.
    ///
    /// For HTTP this only builds the client; nothing is sent until the
    /// handshake. For stdio the process is spawned.
    pub fn open(descriptor: &ServerDescriptor, settings: &SessionSettings) -> Result<Self> {
        descriptor.validate()?;
        match descriptor.transport {
            TransportKind::StreamingHttp | TransportKind::PostingHttp => {
                Ok(Self::Http(HttpTransport::new(descriptor, settings)?))
            }
            TransportKind::ProcessStdio => Ok(Self::Stdio(StdioTransport::spawn(descriptor)?)),
        }
    }

    /// Send a request and wait for its result.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<Value> {
        match self {
            Self::Http(http) => http.send(request, on_chunk).await,
            Self::Stdio(stdio) => stdio.send(request).await,
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        match self {
            Self::Http(http) => http.notify(notification).await,
            Self::Stdio(stdio) => stdio.notify(notification).await,
        }
    }

    /// Probe the server's health endpoint.
    pub async fn probe_health(&self, timeout: Duration) -> HealthProbe {
        match self {
            Self::Http(http) => http.probe_health(timeout).await,
            Self::Stdio(_) => HealthProbe::Unsupported,
        }
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        match self {
            Self::Http(http) => http.session_id(),
            Self::Stdio(_) => None,
        }
    }

    /// Check if the transport is still usable.
    pub fn is_alive(&self) -> bool {
        match self {
            // HTTP transport is always "connected" (stateless)
            Self::Http(_) => true,
            Self::Stdio(stdio) => stdio.is_alive(),
        }
    }

    /// Shutdown the transport.
    pub async fn shutdown(&self) {
        match self {
            Self::Http(http) => http.clear_session_id(),
            Self::Stdio(stdio) => stdio.shutdown().await,
        }
    }

    /// Check if this is an HTTP transport.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP transport bound to one endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    server_id: String,
    endpoint: Url,
    health_url: Url,
    proxy: Option<Url>,
    headers: HeaderMap,
    incremental: bool,
    force_stream: bool,
    session_id: parking_lot::Mutex<Option<String>>,
}

impl HttpTransport {
    /// Build a transport for an HTTP descriptor.
    pub fn new(descriptor: &ServerDescriptor, settings: &SessionSettings) -> Result<Self> {
        let endpoint = descriptor.endpoint_url()?;
        let health_url = descriptor.health_url()?;
        let proxy = settings
            .proxy_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| McpError::invalid_descriptor(format!("invalid proxy URL: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(PROTOCOL_VERSION_HEADER),
            HeaderValue::from_static(MCP_PROTOCOL_VERSION),
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
        for (key, value) in &descriptor.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                McpError::invalid_descriptor(format!("invalid header name '{}': {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                McpError::invalid_descriptor(format!("invalid value for header '{}': {}", key, e))
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(
            server = %descriptor.id,
            url = %endpoint,
            proxied = proxy.is_some(),
            "created HTTP transport"
        );

        Ok(Self {
            client,
            server_id: descriptor.id.clone(),
            endpoint,
            health_url,
            proxy,
            headers,
            incremental: descriptor.transport == TransportKind::StreamingHttp,
            force_stream: descriptor.extensions.sse_body,
            session_id: parking_lot::Mutex::new(None),
        })
    }

    /// The endpoint requests are meant for.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn clear_session_id(&self) {
        *self.session_id.lock() = None;
    }

    /// Start a request to `target`, through the proxy when one is configured.
    fn request(&self, method: reqwest::Method, target: &Url) -> reqwest::RequestBuilder {
        let builder = match &self.proxy {
            Some(proxy) => self
                .client
                .request(method, proxy.clone())
                .header(TARGET_URL_HEADER, target.as_str()),
            None => self.client.request(method, target.clone()),
        };
        let builder = builder.headers(self.headers.clone());
        match self.session_id() {
            Some(id) => builder.header(SESSION_ID_HEADER, id),
            None => builder,
        }
    }

    /// POST a JSON body and return the successful response.
    async fn post(&self, body: String) -> Result<reqwest::Response> {
        tracing::trace!(server = %self.server_id, json = %body, "sending MCP HTTP request");

        let response = self
            .request(reqwest::Method::POST, &self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(id) {
                tracing::debug!(server = %self.server_id, session_id = %id, "server assigned session id");
                *current = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Send a request and decode its reply.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
        mut on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<Value> {
        let response = self.post(codec::encode_request(request)?).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let declared_stream = codec::is_event_stream(content_type.as_deref());
        if self.incremental && (declared_stream || self.force_stream) {
            let mut decoder = FrameDecoder::new();
            let mut acc = StreamAccumulator::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk
                    .map_err(|e| McpError::transport(format!("stream read failed: {}", e)))?;
                for frame in decoder.push(&chunk) {
                    acc.absorb(frame, &mut on_chunk);
                }
            }
            for frame in decoder.finish() {
                acc.absorb(frame, &mut on_chunk);
            }
            tracing::trace!(server = %self.server_id, frames = acc.frames(), "stream finished");
            return acc.finish();
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| McpError::transport(format!("failed to read response body: {}", e)))?;
        tracing::trace!(
            server = %self.server_id,
            json = %String::from_utf8_lossy(&bytes),
            "received MCP HTTP response"
        );
        codec::decode_body(
            content_type.as_deref(),
            &bytes,
            self.force_stream,
            on_chunk,
        )
    }

    /// Send a notification; any 2xx status is accepted.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let body = serde_json::to_string(notification)?;
        self.post(body).await.map(|_| ())
    }

    /// GET the health endpoint.
    pub async fn probe_health(&self, timeout: Duration) -> HealthProbe {
        let sent = self
            .request(reqwest::Method::GET, &self.health_url)
            .timeout(timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return HealthProbe::Unhealthy(format!(
                    "health probe timed out after {}ms",
                    timeout.as_millis()
                ));
            }
            Err(e) => return HealthProbe::Unhealthy(format!("health probe failed: {}", e)),
        };

        let status = response.status().as_u16();
        if status == 404 || status == 405 {
            return HealthProbe::Unsupported;
        }
        if !response.status().is_success() {
            return HealthProbe::Unhealthy(format!("health endpoint returned HTTP {}", status));
        }

        match response.json::<Value>().await {
            Ok(body) if health_body_is_healthy(&body) => HealthProbe::Healthy,
            Ok(body) => HealthProbe::Unhealthy(format!("health endpoint reported {}", body)),
            Err(e) => HealthProbe::Unhealthy(format!("unreadable health response: {}", e)),
        }
    }
}

/// Accepts `{status:"healthy"|"ok"}`, `{healthy:true}` and `{ok:true}`.
pub fn health_body_is_healthy(body: &Value) -> bool {
    let status_ok = body
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("healthy") || s.eq_ignore_ascii_case("ok"));
    let flag = |key: &str| body.get(key).and_then(Value::as_bool) == Some(true);
    status_ok || flag("healthy") || flag("ok")
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio
// ─────────────────────────────────────────────────────────────────────────────

struct StdioPipes {
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// Child-process transport with Content-Length framing.
pub struct StdioTransport {
    server_id: String,
    child: parking_lot::Mutex<Child>,
    pipes: tokio::sync::Mutex<StdioPipes>,
}

impl StdioTransport {
    /// Spawn the descriptor's command.
    pub fn spawn(descriptor: &ServerDescriptor) -> Result<Self> {
        let command = descriptor
            .command
            .as_deref()
            .ok_or_else(|| McpError::invalid_descriptor("stdio transport requires a command"))?;

        let mut cmd = Command::new(command);
        cmd.args(&descriptor.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &descriptor.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;

        tracing::info!(server = %descriptor.id, command = %command, "spawned MCP server process");

        Ok(Self {
            server_id: descriptor.id.clone(),
            child: parking_lot::Mutex::new(child),
            pipes: tokio::sync::Mutex::new(StdioPipes {
                stdin: BufWriter::new(stdin),
                stdout: BufReader::new(stdout),
            }),
        })
    }

    /// Send a request and read messages until its response arrives.
    pub async fn send(&self, request: &JsonRpcRequest) -> Result<Value> {
        let mut pipes = self.pipes.lock().await;
        write_frame(&mut pipes.stdin, &codec::encode_request(request)?).await?;

        loop {
            let message = read_frame(&mut pipes.stdout).await?;
            tracing::trace!(server = %self.server_id, json = %message, "received MCP message");
            let value: Value = serde_json::from_str(&message)
                .map_err(|e| McpError::decode(format!("invalid JSON from server: {}", e)))?;
            // server-initiated notifications and requests are skipped
            if value.get("id").and_then(Value::as_u64) != Some(request.id) {
                continue;
            }
            return RpcReply::from_value(value).into_result();
        }
    }

    /// Send a notification.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let mut pipes = self.pipes.lock().await;
        write_frame(&mut pipes.stdin, &serde_json::to_string(notification)?).await
    }

    /// Check if the child is still running.
    pub fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Kill the child process.
    pub async fn shutdown(&self) {
        let pid = {
            let mut child = self.child.lock();
            let pid = child.id();
            let _ = child.start_kill();
            pid
        };
        tracing::debug!(server = %self.server_id, pid = ?pid, "stopped MCP server process");
    }
}

async fn write_frame(stdin: &mut BufWriter<ChildStdin>, json: &str) -> Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    stdin.write_all(header.as_bytes()).await?;
    stdin.write_all(json.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncBufRead + Unpin>(stdout: &mut R) -> Result<String> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(McpError::ConnectionClosed);
        }

        let trimmed = line.trim();
        // Empty line signals end of headers
        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }

        if let Some(len) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(len.trim().parse().map_err(|e| {
                McpError::decode(format!("invalid Content-Length: {}", e))
            })?);
        }
    }

    let content_length =
        content_length.ok_or_else(|| McpError::decode("missing Content-Length header"))?;
    if content_length > MAX_FRAME_BYTES {
        return Err(McpError::decode(format!(
            "frame of {} bytes exceeds the {} byte limit",
            content_length, MAX_FRAME_BYTES
        )));
    }
    let mut body = vec![0u8; content_length];
    stdout.read_exact(&mut body).await?;
    String::from_utf8(body).map_err(|e| McpError::decode(format!("invalid UTF-8: {}", e)))
}
