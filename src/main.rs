#![forbid(unsafe_code)]

//! `job-coach` career-coach chat backend binary.
//!
//! Loads configuration, wires the tool-session manager, the completion
//! client and the chat orchestrator, serves the HTTP API, and tears the
//! tool server down on shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use job_coach::chat::ChatOrchestrator;
use job_coach::completion::NimClient;
use job_coach::config::GlobalConfig;
use job_coach::extract::DocumentExtractor;
use job_coach::http::{self, ApiState};
use job_coach::tools::session::ProcessLauncher;
use job_coach::tools::SessionManager;
use job_coach::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "job-coach", about = "Career-coach chat backend", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("job-coach bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.apply_env_overrides()?;
    if let Some(port) = args.port {
        config.http.port = port;
    }
    config.load_credentials().await?;
    let system_prompt = config.read_system_prompt()?;
    info!("configuration loaded");

    // ── Tool session ────────────────────────────────────
    let launcher = ProcessLauncher::new(
        config.tool_server.process_config(),
        config.tool_server.handshake_timeout(),
        config.tool_server.session_options().shutdown_grace,
    );
    let tools = Arc::new(SessionManager::new(
        launcher,
        config.tool_server.session_options(),
    ));
    if let Err(err) = tools.start_session().await {
        warn!(%err, "tool session not available at startup; will retry on first use");
    }

    // ── Shared application state ────────────────────────
    let completion = Arc::new(NimClient::new(&config.completion)?);
    let orchestrator = ChatOrchestrator::new(
        Arc::clone(&tools),
        completion,
        system_prompt,
        config.tool_server.job_limit,
    );
    let state = Arc::new(ApiState {
        orchestrator,
        extractor: Arc::new(DocumentExtractor),
        upload_dir: config.upload_dir(),
        allow_origins: config.http.allow_origins.clone(),
    });

    // ── Start HTTP API ──────────────────────────────────
    let bind = SocketAddr::from(([127, 0, 0, 1], config.http.port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = http::serve(listener, state, server_ct).await {
            error!(%err, "http api failed");
        }
    });

    info!("job-coach ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = server.await {
        error!(%err, "http task panicked");
    }
    tools.stop_session().await;
    info!("job-coach shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
