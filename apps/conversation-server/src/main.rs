//! ASP Conversation Server - standalone headless server for the Audio
//! Session Protocol.
//!
//! Hosts the `/ws` WebSocket listener and runs the conversation pipeline
//! (STT -> LLM -> TTS) for every connected call leg.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use asp_core::{bootstrap_services, start_server, AppState};
use clap::Parser;
use tokio::signal;

use crate::config::load_config;

/// ASP Conversation Server.
#[derive(Parser, Debug)]
#[command(name = "conversation-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ASP_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Listen port (overrides config file and `ASP_LISTEN_PORT`).
    #[arg(short = 'p', long, env = "ASP_LISTEN_PORT_CLI")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ASP Conversation Server v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_deref(), args.port)
        .context("failed to load configuration")?;

    log::info!(
        "configuration: listen_port={}, provider_kind={:?}",
        config.listen_port,
        config.providers.kind
    );

    let services = bootstrap_services(&config).context("failed to bootstrap services")?;
    log::info!("services bootstrapped successfully");

    let app_state = AppState::builder()
        .from_services(&services)
        .audio_config(config.audio.clone())
        .vad_config(config.vad)
        .build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("server error: {e}");
        }
    });

    log::info!("WebSocket server started on port {}", config.listen_port);

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
