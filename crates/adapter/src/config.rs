//! Adapter configuration.
//!
//! Every field has a default, so an absent config file is equivalent to an empty one.
//! CLI flags are applied on top by the binary.

use crate::error::{AdapterError, Result};
use clap::ValueEnum;
use restbridge_http::response_shaping::ResponseShaping;
use restbridge_openapi::auth::BasicCredentials;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub global: GlobalConfig,
    pub auth: AuthConfig,
    pub responses: ResponsesConfig,
}

/// Which transport to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// `GET /sse` event stream plus `POST /messages/`.
    #[default]
    Sse,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    /// Seconds between SSE heartbeat events.
    pub heartbeat_secs: u64,
    pub stdio_workers: usize,
    pub stdio_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mode: Mode::Sse,
            heartbeat_secs: 30,
            stdio_workers: 4,
            stdio_queue: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    /// Upstream request timeout in seconds.
    pub timeout: u64,
    /// Headers added to every upstream request (before credentials).
    #[serde(alias = "default_headers")]
    pub default_headers: BTreeMap<String, String>,
    /// Cap on upstream response bodies.
    pub max_response_bytes: Option<usize>,
    /// Cap on `POST /messages/` bodies (SSE mode).
    #[serde(alias = "max_request_size")]
    pub max_request_bytes: Option<usize>,
    /// Prefix stripped from `tools/call` names.
    pub tool_prefix: String,
    /// Overrides the document's first server URL.
    pub base_url: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            default_headers: BTreeMap::new(),
            max_response_bytes: None,
            max_request_bytes: None,
            tool_prefix: "mcp_".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Static credentials for `http/basic` schemes, keyed by scheme name.
    pub basic: HashMap<String, BasicCredentials>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponsesConfig {
    /// Applied to tools with no more specific shaping.
    pub default: Option<ResponseShaping>,
    /// Per-tool shaping, keyed by tool name.
    pub tools: HashMap<String, ResponseShaping>,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Config(format!("failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check values that deserialize fine but cannot be served.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.global.timeout == 0 {
            return Err(AdapterError::Config("global.timeout must be > 0".to_string()));
        }
        if self.server.stdio_workers == 0 {
            return Err(AdapterError::Config(
                "server.stdioWorkers must be > 0".to_string(),
            ));
        }
        if self.server.stdio_queue == 0 {
            return Err(AdapterError::Config("server.stdioQueue must be > 0".to_string()));
        }
        if self.server.heartbeat_secs == 0 {
            return Err(AdapterError::Config(
                "server.heartbeatSecs must be > 0".to_string(),
            ));
        }
        for name in self.global.default_headers.keys() {
            if invalid_header_name(name) {
                return Err(AdapterError::Config(format!(
                    "global.defaultHeaders: invalid header name '{name}'"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.global.timeout)
    }

    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_secs)
    }
}

// RFC 7230 token characters.
fn invalid_header_name(name: &str) -> bool {
    name.is_empty()
        || !name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
