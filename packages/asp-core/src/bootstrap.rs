//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::config::{Config, ProviderKind};
use crate::error::{AspError, AspResult};
use crate::events::BroadcastEventBridge;
use crate::pipeline::{ConversationPipeline, PipelineConfig};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::providers::reference::{EchoSpeechToText, ScriptedLanguageModel, ToneTextToSpeech};
use crate::providers::{LanguageModel, SpeechToText, TextToSpeech};

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by [`crate::api::AppState`] to build the final application
/// state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Listen port from configuration.
    pub listen_port: u16,
    /// The wired conversation pipeline (STT -> LLM -> TTS).
    pub pipeline: Arc<ConversationPipeline>,
    /// Event bridge for emitting events to WebSocket and optional external consumers.
    /// `event_bridge.subscribe()` is the one broadcast channel every domain
    /// event (session/response/vad/backpressure) is published to.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Cancellation token for graceful shutdown of every session.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services: cancels every
    /// in-flight session and force-closes any lingering WebSocket
    /// connections.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        let closed = self.ws_manager.close_all();
        log::info!("[Bootstrap] Force-closed {closed} connection(s)");
        log::info!("[Bootstrap] Shutdown complete");
    }
}

fn build_providers(
    config: &Config,
) -> AspResult<(Arc<dyn SpeechToText>, Arc<dyn LanguageModel>, Arc<dyn TextToSpeech>)> {
    match config.providers.kind {
        ProviderKind::Reference => Ok((
            Arc::new(EchoSpeechToText),
            Arc::new(ScriptedLanguageModel::new()),
            Arc::new(ToneTextToSpeech::new()),
        )),
    }
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (event bridge, cancellation token)
/// 2. Connection tracking (WebSocket connection manager)
/// 3. Provider adapters (STT/LLM/TTS, per `config.providers`)
/// 4. Conversation pipeline (depends on providers and pipeline tunables)
///
/// # Errors
///
/// Returns an error if `config` fails validation or an unknown provider kind
/// is configured.
pub fn bootstrap_services(config: &Config) -> AspResult<BootstrappedServices> {
    config.validate()?;

    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));

    let cancel_token = CancellationToken::new();
    let ws_manager = Arc::new(WsConnectionManager::new());

    let (stt, llm, tts) = build_providers(config)
        .map_err(|e| AspError::Configuration(format!("failed to build providers: {e}")))?;

    let pipeline = Arc::new(ConversationPipeline::new(
        stt,
        llm,
        tts,
        PipelineConfig::from(config.pipeline),
    ));

    Ok(BootstrappedServices {
        listen_port: config.listen_port,
        pipeline,
        event_bridge,
        ws_manager,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_wires_a_usable_pipeline() {
        let config = Config::default();
        let services = bootstrap_services(&config).unwrap();
        assert_eq!(services.listen_port, config.listen_port);
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.pipeline.tx_low_watermark = config.pipeline.tx_high_watermark + 1;
        assert!(bootstrap_services(&config).is_err());
    }
}
