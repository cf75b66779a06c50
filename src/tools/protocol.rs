//! JSON-RPC session protocol spoken with the tool server.
//!
//! The tool server uses the MCP stdio transport: one compact JSON-RPC 2.0
//! object per line, in both directions. A session goes through:
//!
//! 1. **`initialize`**: request with id `1` carrying the protocol version,
//!    empty client capabilities and `clientInfo`.
//! 2. **`notifications/initialized`**: notification sent once the
//!    `initialize` response has been read.
//! 3. **`tools/call`**: one request per [`ToolCall`], each with a fresh id;
//!    the matching response is decoded into a [`ToolResult`].
//!
//! A [`ToolClient`] is only ever produced by [`ToolClient::handshake`], so a
//! tool call cannot be written before initialization has completed.
//! `call_tool` takes `&mut self`, which serializes calls on one session.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::errors::{ToolError, ToolErrorKind};
use crate::tools::codec::ToolCodec;
use crate::tools::jobs;

/// MCP protocol revision requested during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Name announced in `clientInfo`.
pub const CLIENT_NAME: &str = "job-coach";

/// Correlation id of the `initialize` request.
const INIT_ID: u64 = 1;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Inbound half of a tool-server stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound half of a tool-server stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ── Tool calls ───────────────────────────────────────────────────────────────

/// One named tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    name: String,
    arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a call, rejecting an empty tool name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolErrorKind::InvalidCall`] when `name` is blank.
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Result<Self, ToolError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::invalid_call("tool name must not be empty"));
        }
        Ok(Self { name, arguments })
    }

    /// Build a call from an arbitrary JSON value.
    ///
    /// `null` means "no arguments"; anything other than an object is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ToolErrorKind::InvalidCall`] for a blank name or non-object
    /// arguments.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Result<Self, ToolError> {
        match arguments {
            Value::Null => Self::new(name, Map::new()),
            Value::Object(map) => Self::new(name, map),
            other => Err(ToolError::invalid_call(format!(
                "tool arguments must be a JSON object, got {other}"
            ))),
        }
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool arguments.
    #[must_use]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Check the arguments against the schema of known tools.
    ///
    /// Tools without a registered schema are passed through unchecked.
    ///
    /// # Errors
    ///
    /// Returns [`ToolErrorKind::InvalidCall`] when the arguments do not match.
    pub fn validate(&self) -> Result<(), ToolError> {
        match self.name.as_str() {
            jobs::SEARCH_JOBS => jobs::validate_search_jobs_args(&self.arguments),
            _ => Ok(()),
        }
    }
}

// ── Tool results ─────────────────────────────────────────────────────────────

/// One unit of unstructured tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block type as reported by the server (`text`, `image`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload; absent for non-text blocks.
    #[serde(default)]
    pub text: Option<String>,
}

impl ContentBlock {
    /// A `text` block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
        }
    }
}

/// Decoded response to a [`ToolCall`].
///
/// Holds the structured value when the tool declared an output schema and
/// the content blocks it always emits. At least one of the two is present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResult {
    /// Typed output matching the tool's declared output schema.
    pub structured: Option<Value>,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

/// `tools/call` result as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolWire {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    structured_content: Option<Value>,
    #[serde(default)]
    is_error: bool,
}

/// `initialize` result as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeWire {
    protocol_version: String,
    #[serde(default)]
    server_info: Option<ServerInfoWire>,
}

#[derive(Debug, Deserialize)]
struct ServerInfoWire {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// Proof of a completed handshake: what the server agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Protocol revision returned by the server.
    pub protocol_version: String,
    /// Server name from `serverInfo`, when provided.
    pub server_name: Option<String>,
    /// Server version from `serverInfo`, when provided.
    pub server_version: Option<String>,
}

// ── Inbound envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// An initialized session with a tool server.
pub struct ToolClient {
    inbound: FramedRead<BoxedReader, ToolCodec>,
    outbound: FramedWrite<BoxedWriter, ToolCodec>,
    next_id: u64,
    token: SessionToken,
    in_flight: bool,
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("next_id", &self.next_id)
            .field("token", &self.token)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl ToolClient {
    /// Run the `initialize` / `notifications/initialized` exchange.
    ///
    /// Messages the server sends before the `initialize` response (log
    /// notifications, pings) are handled and skipped.
    ///
    /// # Errors
    ///
    /// - [`ToolErrorKind::HandshakeFailed`]: timeout, error response, or an
    ///   `initialize` result without `protocolVersion`.
    /// - [`ToolErrorKind::TransportFailure`]: the stream closed or failed
    ///   (typically the process exited right after start).
    pub async fn handshake(
        reader: BoxedReader,
        writer: BoxedWriter,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let mut client = Self {
            inbound: FramedRead::new(reader, ToolCodec::new()),
            outbound: FramedWrite::new(writer, ToolCodec::new()),
            next_id: INIT_ID,
            token: SessionToken {
                protocol_version: String::new(),
                server_name: None,
                server_version: None,
            },
            in_flight: false,
        };

        let request = json!({
            "jsonrpc": "2.0",
            "id": INIT_ID,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        });

        let exchange = async {
            client.write_message(&request).await?;
            client.read_response(INIT_ID).await
        };
        let raw = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| {
                ToolError::handshake(format!(
                    "'initialize' response not received within {timeout:?}"
                ))
            })?
            .map_err(|err| match err.kind() {
                ToolErrorKind::TransportFailure => ToolError::transport(format!(
                    "during handshake: {}",
                    err.message()
                )),
                _ => ToolError::handshake(format!("initialize rejected: {}", err.message())),
            })?;

        let init: InitializeWire = serde_json::from_value(raw)
            .map_err(|e| ToolError::handshake(format!("invalid initialize result: {e}")))?;

        client
            .write_message(&json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .await?;

        let (server_name, server_version) = init
            .server_info
            .map_or((None, None), |info| (Some(info.name), info.version));
        client.token = SessionToken {
            protocol_version: init.protocol_version,
            server_name,
            server_version,
        };

        info!(
            protocol_version = %client.token.protocol_version,
            server = client.token.server_name.as_deref().unwrap_or("unknown"),
            "tool session initialized"
        );
        Ok(client)
    }

    /// What the server agreed to during the handshake.
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Whether a previous call was abandoned between its request and its
    /// response. The stream may then hold a partial frame, so the session
    /// must not be reused.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.in_flight
    }

    /// Perform one `tools/call` round trip.
    ///
    /// # Errors
    ///
    /// - [`ToolErrorKind::InvalidCall`]: arguments fail schema validation
    ///   (nothing is written).
    /// - [`ToolErrorKind::ToolReportedFailure`]: JSON-RPC error response or
    ///   a result flagged `isError`.
    /// - [`ToolErrorKind::MalformedResponse`]: unparseable or empty result.
    /// - [`ToolErrorKind::TransportFailure`]: stream closed or failed, or
    ///   the client is poisoned.
    pub async fn call_tool(&mut self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        call.validate()?;
        if self.in_flight {
            return Err(ToolError::transport(
                "session desynchronized by an abandoned call",
            ));
        }

        self.next_id += 1;
        let id = self.next_id;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": call.name(),
                "arguments": call.arguments(),
            }
        });

        self.in_flight = true;
        self.write_message(&request).await?;
        let raw = self.read_response(id).await;
        self.in_flight = false;

        debug!(tool = call.name(), id, ok = raw.is_ok(), "tools/call completed");
        decode_call_result(call.name(), raw?)
    }

    /// Serialize `value` as one line and flush it.
    async fn write_message(&mut self, value: &Value) -> Result<(), ToolError> {
        let line = serde_json::to_string(value)
            .map_err(|e| ToolError::transport(format!("failed to serialise request: {e}")))?;
        self.outbound
            .send(line)
            .await
            .map_err(|e| ToolError::transport(format!("write failed: {}", e.message())))
    }

    /// Read lines until the response correlated with `id` arrives.
    ///
    /// Returns the raw `result` value. Responses for other ids belong to
    /// abandoned calls and are dropped.
    async fn read_response(&mut self, id: u64) -> Result<Value, ToolError> {
        loop {
            let line = match self.inbound.next().await {
                None => return Err(ToolError::transport("tool server closed its output")),
                Some(Err(err)) => return Err(err),
                Some(Ok(line)) => line,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Incoming = serde_json::from_str(trimmed)
                .map_err(|e| ToolError::malformed(format!("malformed json: {e}")))?;

            match (message.method, message.id) {
                (Some(method), Some(request_id)) => {
                    self.answer_server_request(&method, request_id).await?;
                }
                (Some(method), None) => {
                    debug!(method, "tool server notification skipped");
                }
                (None, response_id) => {
                    if response_id.as_ref().and_then(Value::as_u64) != Some(id) {
                        warn!(
                            expected = id,
                            received = ?response_id,
                            "dropping response for an abandoned request"
                        );
                        continue;
                    }
                    if let Some(error) = message.error {
                        return Err(ToolError::tool_reported(format!(
                            "{} (code {})",
                            error.message, error.code
                        )));
                    }
                    return message
                        .result
                        .ok_or_else(|| ToolError::malformed("response carries no result"));
                }
            }
        }
    }

    /// Reply to a request initiated by the server.
    ///
    /// Only `ping` is supported; the client declares no other capability.
    async fn answer_server_request(
        &mut self,
        method: &str,
        request_id: Value,
    ) -> Result<(), ToolError> {
        let reply = if method == "ping" {
            json!({ "jsonrpc": "2.0", "id": request_id, "result": {} })
        } else {
            debug!(method, "rejecting unsupported server request");
            json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "error": { "code": METHOD_NOT_FOUND, "message": format!("method not found: {method}") }
            })
        };
        self.write_message(&reply).await
    }
}

/// Turn a raw `tools/call` result into a [`ToolResult`].
fn decode_call_result(tool: &str, raw: Value) -> Result<ToolResult, ToolError> {
    let wire: CallToolWire = serde_json::from_value(raw)
        .map_err(|e| ToolError::malformed(format!("invalid tools/call result: {e}")))?;

    if wire.is_error {
        let detail = wire
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        let detail = if detail.is_empty() {
            "no details".to_owned()
        } else {
            detail
        };
        return Err(ToolError::tool_reported(format!("{tool} failed: {detail}")));
    }

    let structured = wire.structured_content.filter(|v| !v.is_null());
    if structured.is_none() && wire.content.is_empty() {
        return Err(ToolError::malformed(
            "result has neither structured content nor content blocks",
        ));
    }

    Ok(ToolResult {
        structured,
        content: wire.content,
    })
}
