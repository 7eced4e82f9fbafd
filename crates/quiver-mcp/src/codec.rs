//! Request encoding and response decoding.
//!
//! A reply body is either one JSON document or a line-framed event stream:
//!
//! ```text
//! data: {"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"text","text":"a"}]}}
//!
//! data: {"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"text","text":"b"}]}}
//! ```
//!
//! Bare `{...}` lines are accepted as frames too. Network reads may split a
//! frame anywhere, including inside a multi-byte character, so the decoder
//! buffers raw bytes and only parses complete lines.

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcError, JsonRpcRequest, RpcReply};

/// MIME type of a server-push stream.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Encode a request envelope.
pub fn encode_request(request: &JsonRpcRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Returns true if the declared content type is an event stream.
pub fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains(EVENT_STREAM))
}

/// Returns true if the body's first non-empty line is a `data:` frame.
pub fn looks_like_event_stream(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with("data:"))
}

/// Reassembles line frames from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Parse one line into a frame, if it carries one.
fn parse_line(raw: &[u8]) -> Option<Value> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.trim_start()
    } else if line.starts_with('{') {
        line
    } else {
        // event:, id:, retry: and ':' comment lines
        return None;
    };

    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, line = %payload, "skipping unparseable stream frame");
            None
        }
    }
}

/// Folds stream frames into a final result, forwarding content as it arrives.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    latest: Option<Value>,
    error: Option<JsonRpcError>,
    frames: usize,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one frame.
    ///
    /// A frame with a `result` replaces the latest known full result; each
    /// element of its `result.content` array is passed to `on_chunk`.
    pub fn absorb(&mut self, frame: Value, on_chunk: &mut Option<ChunkCallback<'_>>) {
        self.frames += 1;
        match RpcReply::from_value(frame) {
            RpcReply::Ok(result) => {
                if let (Some(callback), Some(Value::Array(items))) =
                    (on_chunk.as_mut(), result.get("content"))
                {
                    for item in items {
                        callback(item);
                    }
                }
                self.latest = Some(result);
            }
            RpcReply::Protocol(err) => self.error = Some(err),
            // notifications and progress messages carry neither
            RpcReply::Malformed(_) => {}
        }
    }

    /// Number of frames seen so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Finish the stream.
    pub fn finish(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        self.latest.ok_or_else(|| {
            McpError::decode(format!(
                "stream ended after {} frames without a result",
                self.frames
            ))
        })
    }
}

/// Per-chunk callback invoked with each streamed content item.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(&Value) + Send);

/// Decode a complete, non-streamed reply body.
pub fn decode_json_body(body: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| McpError::decode(format!("invalid JSON response: {}", e)))?;
    RpcReply::from_value(value).into_result()
}

/// Decode a complete reply body of either shape.
///
/// The body is treated as an event stream when the content type says so,
/// when `force_stream` is set, or when its first line is a `data:` frame.
pub fn decode_body(
    content_type: Option<&str>,
    body: &[u8],
    force_stream: bool,
    mut on_chunk: Option<ChunkCallback<'_>>,
) -> Result<Value> {
    if force_stream || is_event_stream(content_type) || looks_like_event_stream(body) {
        let mut decoder = FrameDecoder::new();
        let mut acc = StreamAccumulator::new();
        for frame in decoder.push(body).into_iter().chain(decoder.finish()) {
            acc.absorb(frame, &mut on_chunk);
        }
        acc.finish()
    } else {
        decode_json_body(body)
    }
}

/// The typed outcome of a successful `tools/call`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ToolOutput {
    /// A single text item whose text was itself JSON.
    Json(Value),
    /// A single text item that is not JSON.
    Text(String),
    /// Anything else: the full `result` object.
    Raw(Value),
}

impl ToolOutput {
    /// Unwrap a `tools/call` result.
    ///
    /// Tool servers frequently JSON-encode structured payloads inside a
    /// single text item; that item is parsed when possible.
    pub fn from_result(result: Value) -> Self {
        let single_text = match result.get("content") {
            Some(Value::Array(items)) if items.len() == 1 => {
                let item = &items[0];
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    item.get("text").and_then(Value::as_str).map(str::to_string)
                } else {
                    None
                }
            }
            _ => None,
        };

        match single_text {
            Some(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::Text(text),
            },
            None => Self::Raw(result),
        }
    }

    /// Render as a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) | Self::Raw(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}
