//! JSON-RPC 2.0 envelope handling and the MCP method table.
//!
//! The engine is shared by every transport and every session; per-connection lifecycle state
//! lives in a [`Peer`]. A transport hands the engine one raw envelope and gets back at most one
//! serialized response.

use crate::invoker::ToolInvoker;
use futures::FutureExt as _;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Extra time granted on top of the upstream timeout before the engine gives up on a request.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);
/// Time for the `exit` acknowledgement to reach the client before shutdown starts.
const EXIT_GRACE: Duration = Duration::from_millis(50);

pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_TIMEOUT: i64 = -32001;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Outgoing envelope. `id` is echoed byte-for-byte (or `null`).
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Option<Box<RawValue>>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Box<RawValue>>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize response");
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"Internal error"}}}}"#,
                codes::INTERNAL_ERROR
            )
        })
    }
}

/// Lifecycle of one protocol peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Uninitialized,
    Initialized,
    Terminating,
    Closed,
}

/// One connected client: the stdio stream, or one SSE session.
#[derive(Debug)]
pub struct Peer {
    label: String,
    state: Mutex<PeerState>,
}

impl Peer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(PeerState::Uninitialized),
        }
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn close(&self) {
        *self.state.lock() = PeerState::Closed;
    }

    fn mark_initialized(&self) {
        let mut state = self.state.lock();
        if matches!(*state, PeerState::Uninitialized | PeerState::Initialized) {
            *state = PeerState::Initialized;
        }
    }

    fn mark_terminating(&self) {
        let mut state = self.state.lock();
        if *state != PeerState::Closed {
            *state = PeerState::Terminating;
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reported as `serverInfo.name`.
    pub server_name: String,
    pub server_version: String,
    /// Stripped from `tools/call` names when present; empty disables stripping.
    pub tool_prefix: String,
}

/// Envelope fields, validated.
struct Envelope {
    id: Option<Box<RawValue>>,
    method: String,
    params: Option<Value>,
}

#[derive(serde::Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Option<Box<RawValue>>,
}

pub struct ProtocolEngine {
    invoker: Arc<ToolInvoker>,
    settings: EngineSettings,
    shutdown: CancellationToken,
}

impl ProtocolEngine {
    pub fn new(
        invoker: Arc<ToolInvoker>,
        settings: EngineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            invoker,
            settings,
            shutdown,
        }
    }

    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Handle one raw envelope. `None` means nothing is sent back (notifications).
    pub async fn handle(&self, peer: &Peer, raw: &str) -> Option<RpcResponse> {
        let envelope = match parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(response) => return Some(*response),
        };
        let is_notification = envelope.id.is_none();
        let id = envelope.id.clone();
        let method = envelope.method.clone();

        tracing::debug!(peer = %peer.label(), method = %method, notification = is_notification, "request");

        let deadline = self.invoker.timeout() + DEADLINE_SLACK;
        let work = AssertUnwindSafe(self.dispatch(peer, envelope)).catch_unwind();
        let response = match tokio::time::timeout(deadline, work).await {
            Ok(Ok(response)) => response,
            Ok(Err(panic)) => {
                let detail = panic_message(panic.as_ref());
                tracing::error!(peer = %peer.label(), method = %method, panic = %detail, "request handler panicked");
                Some(RpcResponse::error(
                    id,
                    codes::INTERNAL_ERROR,
                    format!("Internal error: {detail}"),
                ))
            }
            Err(_) => {
                tracing::warn!(peer = %peer.label(), method = %method, deadline_ms = deadline.as_millis(), "request timed out");
                Some(RpcResponse::error(id, codes::REQUEST_TIMEOUT, "Request timed out"))
            }
        };

        if is_notification {
            return None;
        }
        response
    }

    async fn dispatch(&self, peer: &Peer, envelope: Envelope) -> Option<RpcResponse> {
        let Envelope { id, method, params } = envelope;
        match method.as_str() {
            "initialize" => Some(self.initialize(peer, id, params.as_ref())),
            "notifications/initialized" => {
                tracing::debug!(peer = %peer.label(), "client initialized");
                None
            }
            "notifications/cancelled" => {
                tracing::debug!(peer = %peer.label(), params = ?params, "cancellation noted");
                None
            }
            "tools/list" => {
                let tools = self.invoker.index().list();
                Some(RpcResponse::result(id, json!({ "tools": tools })))
            }
            "tools/call" | "toolCall" => Some(self.call_tool(peer, id, params).await),
            "exit" => {
                tracing::info!(peer = %peer.label(), "exit requested");
                peer.mark_terminating();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(EXIT_GRACE).await;
                    shutdown.cancel();
                });
                Some(RpcResponse::result(id, Value::Null))
            }
            other => {
                tracing::debug!(peer = %peer.label(), method = %other, "method not found");
                Some(RpcResponse::error(
                    id,
                    codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
            }
        }
    }

    fn initialize(&self, peer: &Peer, id: Option<Box<RawValue>>, params: Option<&Value>) -> RpcResponse {
        let Some(Value::Object(params)) = params else {
            return RpcResponse::error(
                id,
                codes::INVALID_PARAMS,
                "Invalid params: initialize expects an object",
            );
        };
        let client = params.get("clientInfo");
        let client_name = client
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let client_version = client
            .and_then(|c| c.get("version"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let requested_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");
        tracing::info!(
            peer = %peer.label(),
            client_name,
            client_version,
            requested_version,
            "initialize"
        );
        peer.mark_initialized();

        RpcResponse::result(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": self.settings.server_name,
                    "version": self.settings.server_version,
                },
            }),
        )
    }

    async fn call_tool(
        &self,
        peer: &Peer,
        id: Option<Box<RawValue>>,
        params: Option<Value>,
    ) -> RpcResponse {
        let Some(Value::Object(mut params)) = params else {
            return RpcResponse::error(
                id,
                codes::INVALID_PARAMS,
                "Invalid params: tools/call expects an object",
            );
        };
        let Some(name) = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
        else {
            return RpcResponse::error(id, codes::INVALID_PARAMS, "Invalid params: missing tool name");
        };
        let args = match params
            .remove("arguments")
            .or_else(|| params.remove("parameters"))
        {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args,
            Some(_) => {
                return RpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    "Invalid params: arguments must be an object",
                );
            }
        };

        if peer.state() == PeerState::Uninitialized {
            tracing::warn!(peer = %peer.label(), tool = %name, "tools/call before initialize");
        }

        let tool = self.strip_prefix(&name);
        let result = self.invoker.invoke(tool, &args).await;
        match serde_json::to_value(result.into_call_tool_result()) {
            Ok(v) => RpcResponse::result(id, v),
            Err(e) => RpcResponse::error(id, codes::INTERNAL_ERROR, format!("Internal error: {e}")),
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        let prefix = self.settings.tool_prefix.as_str();
        if prefix.is_empty() {
            return name;
        }
        match name.strip_prefix(prefix) {
            Some(rest) if !rest.is_empty() => rest,
            _ => name,
        }
    }
}

/// Validate an envelope. Errors come back as ready-to-send responses.
fn parse_envelope(raw: &str) -> Result<Envelope, Box<RpcResponse>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Box::new(RpcResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {e}"))))?;
    let Value::Object(obj) = value else {
        return Err(Box::new(RpcResponse::error(
            None,
            codes::INVALID_REQUEST,
            "Invalid Request: envelope must be an object",
        )));
    };

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(_) | Value::Number(_)) => {
            let mut de = serde_json::Deserializer::from_str(raw);
            IdOnly::deserialize(&mut de).ok().and_then(|v| v.id)
        }
        Some(_) => {
            return Err(Box::new(RpcResponse::error(
                None,
                codes::INVALID_REQUEST,
                "Invalid Request: id must be a string or number",
            )));
        }
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(Box::new(RpcResponse::error(
            id,
            codes::INVALID_REQUEST,
            "Invalid Request: unsupported jsonrpc version",
        )));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(Box::new(RpcResponse::error(
            id,
            codes::INVALID_REQUEST,
            "Invalid Request: missing method",
        )));
    };

    Ok(Envelope {
        method: method.to_string(),
        params: obj.get("params").cloned(),
        id,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
