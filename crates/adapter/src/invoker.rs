//! Tool invocation: resolve -> build -> authenticate -> send -> classify -> shape.
//!
//! Every failure is turned into a [`ToolCallResult::Error`] with a [`ToolErrorKind`]; nothing
//! here produces a protocol-level error. Resolution, binding and auth failures never reach the
//! network.

use crate::config::Config;
use crate::error::{AdapterError, Result};
use restbridge_http::client::{OutboundClient, OutboundError, redact_url};
use restbridge_http::response_shaping::{CompiledShaper, ResponseShaping, compile_shaper};
use restbridge_openapi::auth::{AuthBinder, SecretSource};
use restbridge_openapi::error::OpenApiToolsError;
use restbridge_openapi::index::OperationIndex;
use restbridge_openapi::request::build_request;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No operation matches the tool name.
    Resolution,
    /// Missing parameter, bad base URL, unrepresentable header.
    Binding,
    /// Missing secret, unknown or unsupported scheme.
    Auth,
    /// Timeout, connection refused, oversized body.
    Network,
    ClientError,
    ServerError,
    /// A non-2xx status outside 4xx/5xx (e.g. an unfollowed redirect).
    UnexpectedStatus,
    /// The 2xx body could not be shaped.
    Shaping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ToolError {
    fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Success(Value),
    Error(ToolError),
}

impl ToolCallResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Text carried in the single content block.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Success(Value::String(s)) => s.clone(),
            Self::Success(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
            Self::Error(e) => serde_json::to_string(e).unwrap_or_else(|_| e.message.clone()),
        }
    }

    #[must_use]
    pub fn into_call_tool_result(self) -> CallToolResult {
        let content = vec![Content::text(self.text())];
        if self.is_error() {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

pub struct ToolInvoker {
    index: Arc<OperationIndex>,
    client: Arc<dyn OutboundClient>,
    auth: AuthBinder<Arc<dyn SecretSource>>,
    default_headers: Vec<(String, String)>,
    timeout: Duration,
    shapers: HashMap<String, Arc<CompiledShaper>>,
    default_shaper: Arc<CompiledShaper>,
}

impl ToolInvoker {
    /// Compile every shaper up front so a bad expression fails startup, not the first call.
    ///
    /// Per tool, the first match wins: `responses.tools.<name>`, the operation's
    /// `x-response-transform`, `responses.default`, direct.
    ///
    /// # Errors
    ///
    /// Returns an error if any query expression or template fails to compile.
    pub fn new(
        config: &Config,
        index: Arc<OperationIndex>,
        client: Arc<dyn OutboundClient>,
        secrets: Arc<dyn SecretSource>,
    ) -> Result<Self> {
        let default_shaper = match &config.responses.default {
            Some(shaping) => compile_named("responses.default", shaping)?,
            None => Arc::new(CompiledShaper::default()),
        };

        let mut shapers = HashMap::new();
        for op in index.operations() {
            let name = op.tool_name();
            let configured = config
                .responses
                .tools
                .get(name)
                .or_else(|| config.responses.tools.get(&op.generated_id));
            let shaping = match (configured, &op.response_shaping) {
                (Some(s), _) => s,
                (None, Some(s)) => s,
                (None, None) => continue,
            };
            shapers.insert(name.to_string(), compile_named(name, shaping)?);
        }

        for name in config.responses.tools.keys() {
            if index.resolve(name).is_err() {
                tracing::warn!(tool = %name, "responses.tools entry matches no operation");
            }
        }

        Ok(Self {
            index,
            client,
            auth: AuthBinder::new(secrets, config.auth.basic.clone()),
            default_headers: config
                .global
                .default_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: config.timeout(),
            shapers,
            default_shaper,
        })
    }

    #[must_use]
    pub fn index(&self) -> &OperationIndex {
        &self.index
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(&self, tool_name: &str, args: &Map<String, Value>) -> ToolCallResult {
        let started = Instant::now();
        let result = self.invoke_inner(tool_name, args).await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            ToolCallResult::Success(_) => {
                tracing::info!(tool = %tool_name, elapsed_ms, "tool call succeeded");
            }
            ToolCallResult::Error(e) => tracing::warn!(
                tool = %tool_name,
                kind = ?e.kind,
                status = ?e.code,
                elapsed_ms,
                error = %e.message,
                "tool call failed"
            ),
        }
        result
    }

    async fn invoke_inner(&self, tool_name: &str, args: &Map<String, Value>) -> ToolCallResult {
        let op = match self.index.resolve(tool_name) {
            Ok(op) => op,
            Err(e) => {
                return ToolCallResult::Error(ToolError::new(
                    ToolErrorKind::Resolution,
                    e.to_string(),
                ));
            }
        };

        let mut request = match build_request(op, self.index.base_url(), args) {
            Ok(r) => r,
            Err(e) => return ToolCallResult::Error(classify_openapi_error(&e)),
        };
        for (name, value) in &self.default_headers {
            if request.headers.contains_key(name.as_str()) {
                continue;
            }
            if let Err(e) = request.set_header(name, value) {
                return ToolCallResult::Error(ToolError::new(
                    ToolErrorKind::Binding,
                    e.to_string(),
                ));
            }
        }
        if let Err(e) = self.auth.apply(&self.index, op, &mut request) {
            return ToolCallResult::Error(classify_openapi_error(&e));
        }

        tracing::debug!(
            tool = %tool_name,
            method = %request.method,
            url = %redact_url(&request.url),
            "invoking upstream"
        );

        let response = match self.client.send(request, self.timeout).await {
            Ok(r) => r,
            Err(e) => return ToolCallResult::Error(network_error(&e)),
        };

        let status = response.status;
        if (200..300).contains(&status) {
            let shaper = self
                .shapers
                .get(op.tool_name())
                .unwrap_or(&self.default_shaper);
            return match shaper.shape(&response.body) {
                Ok(v) => ToolCallResult::Success(v),
                Err(e) => ToolCallResult::Error(ToolError {
                    kind: ToolErrorKind::Shaping,
                    message: format!("{} shaping failed: {e}", shaper.mode_name()),
                    code: Some(status),
                    body: Some(response.text_lossy()),
                }),
            };
        }

        let (kind, message) = match status {
            400..=499 => (ToolErrorKind::ClientError, "client error"),
            500..=599 => (ToolErrorKind::ServerError, "server error"),
            _ => (ToolErrorKind::UnexpectedStatus, "unexpected status"),
        };
        ToolCallResult::Error(ToolError {
            kind,
            message: message.to_string(),
            code: Some(status),
            body: Some(response.text_lossy()),
        })
    }
}

fn compile_named(label: &str, shaping: &ResponseShaping) -> Result<Arc<CompiledShaper>> {
    compile_shaper(shaping)
        .map_err(|e| AdapterError::Config(format!("response shaping for '{label}': {e}")))
}

fn classify_openapi_error(e: &OpenApiToolsError) -> ToolError {
    let kind = match e {
        OpenApiToolsError::ToolNotFound(_) => ToolErrorKind::Resolution,
        e if e.is_auth() => ToolErrorKind::Auth,
        _ => ToolErrorKind::Binding,
    };
    ToolError::new(kind, e.to_string())
}

fn network_error(e: &OutboundError) -> ToolError {
    ToolError::new(ToolErrorKind::Network, e.to_string())
}
