//! Expose the operations of an OpenAPI-described REST API as MCP tools.
//!
//! The binary wires these pieces together:
//!
//! - [`config`]: YAML configuration with CLI overrides
//! - [`invoker`]: resolve, build, authenticate, send, classify, shape
//! - [`protocol`]: JSON-RPC envelopes and MCP methods
//! - [`stdio`] / [`sse`]: the two transports

pub mod config;
pub mod error;
pub mod invoker;
pub mod protocol;
pub mod secrets;
pub mod sse;
pub mod stdio;

use crate::config::{Config, Mode};
use crate::error::{AdapterError, Result};
use crate::invoker::ToolInvoker;
use crate::protocol::{EngineSettings, ProtocolEngine};
use crate::secrets::LayeredSecrets;
use restbridge_http::client::{OutboundClient, ReqwestClient};
use restbridge_openapi::auth::SecretSource;
use restbridge_openapi::index::OperationIndex;
use restbridge_openapi::spec::load_spec_file;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

/// Build the protocol engine from already-loaded parts.
///
/// # Errors
///
/// Returns an error if a configured response shaper fails to compile.
pub fn build_engine(
    config: &Config,
    index: OperationIndex,
    client: Arc<dyn OutboundClient>,
    secrets: Arc<dyn SecretSource>,
    shutdown: CancellationToken,
) -> Result<Arc<ProtocolEngine>> {
    let index = index.with_base_url(config.global.base_url.clone());
    let invoker = ToolInvoker::new(config, Arc::new(index), client, secrets)?;
    let settings = EngineSettings {
        server_name: format!("restbridge-{}", config.server.mode),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        tool_prefix: config.global.tool_prefix.clone(),
    };
    Ok(Arc::new(ProtocolEngine::new(
        Arc::new(invoker),
        settings,
        shutdown,
    )))
}

/// Load everything and serve the configured transport until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if startup fails (bad config, unreadable or colliding spec, shaper compile
/// failure, bind failure) or the SSE server stops abnormally.
pub async fn run(
    config: Config,
    spec_path: &Path,
    env_file: Option<&Path>,
    shutdown: CancellationToken,
) -> Result<()> {
    config.validate()?;

    let secrets: Arc<dyn SecretSource> = Arc::new(LayeredSecrets::discover(env_file)?);
    let spec = load_spec_file(spec_path)?;
    let index = OperationIndex::from_spec(&spec)?;
    tracing::info!(
        spec = %spec_path.display(),
        title = index.title().unwrap_or("untitled"),
        tools = index.operations().len(),
        "loaded OpenAPI document"
    );
    if index.base_url().is_none() && config.global.base_url.is_none() {
        tracing::warn!("document declares no server URL and no baseUrl is configured");
    }

    let client = ReqwestClient::with_response_limit(config.global.max_response_bytes)
        .map_err(|e| AdapterError::Startup(format!("failed to build HTTP client: {e}")))?;
    let engine = build_engine(
        &config,
        index,
        Arc::new(client),
        secrets,
        shutdown.clone(),
    )?;

    match config.server.mode {
        Mode::Stdio => {
            tracing::info!(
                workers = config.server.stdio_workers,
                queue = config.server.stdio_queue,
                "serving on stdio"
            );
            stdio::serve(
                engine,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                stdio::StdioSettings {
                    workers: config.server.stdio_workers,
                    queue: config.server.stdio_queue,
                },
                shutdown,
            )
            .await;
            Ok(())
        }
        Mode::Sse => {
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| AdapterError::Startup(format!("failed to bind {addr}: {e}")))?;
            let state = sse::SseState::new(
                engine,
                sse::SseSettings {
                    heartbeat: config.heartbeat(),
                    max_request_bytes: config.global.max_request_bytes,
                },
                shutdown,
            );
            sse::serve(listener, state).await
        }
    }
}
