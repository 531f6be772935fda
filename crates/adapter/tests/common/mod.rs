#![allow(dead_code)]

use anyhow::Context as _;
use axum::Json;
use axum::Router;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use restbridge_adapter::config::Config;
use restbridge_adapter::protocol::ProtocolEngine;
use restbridge_http::client::ReqwestClient;
use restbridge_openapi::index::OperationIndex;
use restbridge_openapi::spec::parse_spec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use restbridge_test_support::{BridgeProcess, free_local_port, wait_for_health};

pub const API_KEY: &str = "test-key";

/// Weather API document; `{base}` is replaced with the stub upstream's URL.
pub const WEATHER_SPEC: &str = r#"
openapi: "3.0.0"
info: { title: Weather, version: "1" }
servers: [ { url: "{base}/v1" } ]
components:
  securitySchemes:
    ApiKeyAuth: { type: apiKey, in: header, name: X-API-Key }
security:
  - ApiKeyAuth: []
paths:
  /current.json:
    get:
      summary: Current conditions
      parameters:
        - { name: q, in: query, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
  /forecast/{city}:
    get:
      operationId: forecast
      x-response-transform: { mode: query, expression: ".days[0]" }
      parameters:
        - { name: city, in: path, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
  /broken:
    get:
      operationId: broken
      security: []
      responses: { "500": { description: fails } }
"#;

#[must_use]
pub fn weather_spec(base: &str) -> String {
    WEATHER_SPEC.replace("{base}", base)
}

/// A stub upstream bound to an ephemeral localhost port. Stops when dropped.
pub struct Upstream {
    pub base: String,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Drop for Upstream {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

pub async fn spawn_weather_upstream() -> anyhow::Result<Upstream> {
    let router = Router::new()
        .route("/v1/current.json", get(current))
        .route("/v1/forecast/{city}", get(forecast))
        .route(
            "/v1/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind stub upstream")?;
    let addr = listener.local_addr()?;
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });
    Ok(Upstream {
        base: format!("http://{addr}"),
        stop: Some(tx),
    })
}

async fn current(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    let city = query.get("q").cloned().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "location": { "name": city },
            "current": { "temp_c": 21.5, "condition": "Sunny" }
        })),
    )
}

async fn forecast(Path(city): Path<String>) -> Json<Value> {
    Json(json!({
        "city": city,
        "days": [ { "day": "mon", "high": 20 }, { "day": "tue", "high": 18 } ]
    }))
}

/// Engine backed by a real HTTP client and an in-memory secret map.
pub fn weather_engine(
    upstream: &Upstream,
    config: &Config,
    secrets: &[(&str, &str)],
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<ProtocolEngine>> {
    let spec = parse_spec(&weather_spec(&upstream.base), "weather.yaml")?;
    let index = OperationIndex::from_spec(&spec)?;
    let secrets: HashMap<String, String> = secrets
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Ok(restbridge_adapter::build_engine(
        config,
        index,
        Arc::new(ReqwestClient::default()),
        Arc::new(secrets),
        shutdown,
    )?)
}

/// Start the compiled binary with piped stdio.
pub fn spawn_restbridge(args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<BridgeProcess> {
    let bin = env!("CARGO_BIN_EXE_restbridge");
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .env_remove("RUST_LOG")
        .env_remove("RESTBRIDGE_SPEC")
        .env_remove("RESTBRIDGE_CONFIG")
        .env_remove("RESTBRIDGE_ENV_FILE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in envs {
        cmd.env(k, v);
    }
    Ok(BridgeProcess::new(cmd.spawn().context("spawn restbridge")?))
}

pub fn request(id: u64, method: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
}

pub fn call_tool(id: u64, name: &str, arguments: Value) -> String {
    request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// The text of the first content block of a `tools/call` result, parsed as JSON.
pub fn tool_payload(response: &Value) -> anyhow::Result<Value> {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .context("missing text content")?;
    Ok(serde_json::from_str(text)?)
}
