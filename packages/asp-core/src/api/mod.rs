//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services. It
//! provides the router construction and server startup functionality. The
//! conversation server's only real surface is the `/ws` upgrade; `/health`
//! and `/ready` exist for deployment probes.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{AudioConfig, VadConfig};
use crate::events::BroadcastEventBridge;
use crate::pipeline::ConversationPipeline;

pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the configured TCP port.
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services. All business
/// logic lives in the services themselves ([`ConversationPipeline`], the
/// session state machine, the VAD).
#[derive(Clone)]
pub struct AppState {
    /// Port the server listens on.
    pub listen_port: u16,
    /// The wired conversation pipeline (STT -> LLM -> TTS).
    pub pipeline: Arc<ConversationPipeline>,
    /// Event bridge for emitting domain events to observers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Root cancellation token; cancelling it closes every session.
    pub cancel_token: CancellationToken,
    /// Default negotiated audio parameters for new sessions.
    pub audio_config: AudioConfig,
    /// Default VAD tunables for new sessions.
    pub vad_config: VadConfig,
    /// `session.start` deadline and related session timers, in ms.
    pub starting_timeout_ms: u64,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    listen_port: Option<u16>,
    pipeline: Option<Arc<ConversationPipeline>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    cancel_token: Option<CancellationToken>,
    audio_config: Option<AudioConfig>,
    vad_config: Option<VadConfig>,
    starting_timeout_ms: Option<u64>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the fields that overlap between `BootstrappedServices` and
    /// `AppState`, leaving only the session-default fields to be set
    /// individually.
    pub fn from_services(mut self, services: &crate::BootstrappedServices) -> Self {
        self.listen_port = Some(services.listen_port);
        self.pipeline = Some(Arc::clone(&services.pipeline));
        self.event_bridge = Some(Arc::clone(&services.event_bridge));
        self.ws_manager = Some(Arc::clone(&services.ws_manager));
        self.cancel_token = Some(services.cancel_token.clone());
        self
    }

    pub fn audio_config(mut self, audio: AudioConfig) -> Self {
        self.audio_config = Some(audio);
        self
    }

    pub fn vad_config(mut self, vad: VadConfig) -> Self {
        self.vad_config = Some(vad);
        self
    }

    pub fn starting_timeout_ms(mut self, ms: u64) -> Self {
        self.starting_timeout_ms = Some(ms);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            listen_port: self.listen_port.expect("listen_port is required"),
            pipeline: self.pipeline.expect("pipeline is required"),
            event_bridge: self.event_bridge.expect("event_bridge is required"),
            ws_manager: self.ws_manager.expect("ws_manager is required"),
            cancel_token: self.cancel_token.expect("cancel_token is required"),
            audio_config: self.audio_config.unwrap_or_default(),
            vad_config: self.vad_config.unwrap_or_default(),
            starting_timeout_ms: self
                .starting_timeout_ms
                .unwrap_or(crate::protocol_constants::STARTING_TIMEOUT_MS),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Liveness probe: "is the process running?"
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: "can this process accept new sessions?"
async fn readiness_check(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "active_connections": state.ws_manager.connection_count(),
    }))
}

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the WebSocket server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.listen_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("[Server] listening on ws://0.0.0.0:{}/ws", state.listen_port);
    let app = create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
