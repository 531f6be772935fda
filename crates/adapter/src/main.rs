use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use restbridge_adapter::config::{Config, Mode};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Blocking stdin reads cannot be interrupted; don't wait on them at exit.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "restbridge", version, about = "Serve an OpenAPI-described REST API as MCP tools")]
struct Cli {
    /// OpenAPI document (YAML or JSON).
    #[arg(long, env = "RESTBRIDGE_SPEC")]
    spec: PathBuf,

    /// Optional YAML configuration file.
    #[arg(long, env = "RESTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// `KEY=value` secrets file consulted after the environment (default: ./.env if present).
    #[arg(long, env = "RESTBRIDGE_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// SSE bind host.
    #[arg(long)]
    host: Option<String>,

    /// SSE bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Upstream request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Ignored when `RUST_LOG` is set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.server.mode = mode;
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.global.timeout = timeout;
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the stdio protocol stream.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
        () = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);

    tracing::info!(
        mode = %config.server.mode,
        spec = %cli.spec.display(),
        "starting restbridge"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    restbridge_adapter::run(config, &cli.spec, cli.env_file.as_deref(), shutdown)
        .await
        .context("restbridge failed")?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}
