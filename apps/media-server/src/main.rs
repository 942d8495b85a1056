//! ASP Media Server - standalone driver for the Audio Session Protocol's
//! client side: owns a (simulated) telephony leg and speaks ASP to a
//! conversation server over WebSocket.

mod driver;
mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use asp_core::vad::VadConfig as CoreVadConfig;
use asp_core::{AudioFormat, Encoding, NoopCallControl, SimulatedMediaChannel};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::driver::{run_driver, DriverConfig};
use crate::transport::TungsteniteTransport;

/// ASP Media Server.
#[derive(Parser, Debug)]
#[command(name = "media-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Conversation server WebSocket URL.
    #[arg(short, long, default_value = "ws://127.0.0.1:8765/ws", env = "ASP_SERVER_URL")]
    server_url: String,

    /// Identifier for the simulated call leg.
    #[arg(short, long, default_value = "sim-call-1")]
    channel_id: String,

    /// Amplitude of the synthesised capture tone (0 = silence, never speaks).
    #[arg(short, long, default_value_t = 6000)]
    tone_amplitude: i16,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ASP_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ASP Media Server v{}", env!("CARGO_PKG_VERSION"));

    // `SimulatedMediaChannel` always produces/consumes linear PCM16 bytes
    // regardless of the encoding its `AudioFormat` is tagged with, so the
    // simulated leg here is pinned to `pcm_s16le` to keep frame sizes
    // consistent between capture and the codec adapter.
    let telephony_format = AudioFormat::new(8_000, Encoding::PcmS16le, 20);
    let sim_channel = Arc::new(SimulatedMediaChannel::tone(
        args.channel_id.clone(),
        telephony_format,
        args.tone_amplitude,
    ));
    let call_control = Arc::new(NoopCallControl);

    let cancel = CancellationToken::new();
    let driver_cancel = cancel.clone();
    let capture_cancel = cancel.clone();

    // Stands in for the hardware/RTP receive path: generates one capture
    // frame per `frame_ms` tick so the driver's capture loop has something
    // to read.
    let capture_source = Arc::clone(&sim_channel);
    let capture_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
            telephony_format.frame_ms as u64,
        ));
        loop {
            tokio::select! {
                _ = capture_cancel.cancelled() => break,
                _ = ticker.tick() => capture_source.generate_capture_frame(),
            }
        }
    });

    let channel: Arc<dyn asp_core::MediaChannel> = sim_channel;

    let transport = TungsteniteTransport::connect(&args.server_url)
        .await
        .with_context(|| format!("failed to connect to {}", args.server_url))?;

    log::info!("connected to {}", args.server_url);

    let config = DriverConfig {
        server_url: args.server_url.clone(),
        telephony_format,
        vad: CoreVadConfig {
            frame_ms: telephony_format.frame_ms,
            ..CoreVadConfig::default()
        },
        system_prompt_ref: None,
    };

    let driver_handle = tokio::spawn(async move {
        if let Err(e) = run_driver(transport, channel, call_control, config, driver_cancel).await {
            log::error!("driver error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, cancelling session...");
    cancel.cancel();
    let _ = driver_handle.await;
    let _ = capture_task.await;

    log::info!("shutdown complete");
    Ok(())
}

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
