//! Deployment configuration (§6, §10.4).
//!
//! A [`Config`] is loaded from YAML with environment-variable overrides,
//! mirroring the reference server's config loading. Every tunable named in
//! §4 and §5 has a field here with the spec-mandated default, grouped into
//! the same sub-structs the protocol groups them into on the wire
//! (`audio`, `vad`, `pipeline`, `providers`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::Encoding;
use crate::error::{AspError, AspResult};
use crate::protocol_constants::*;

/// Top-level deployment configuration for either ASP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the conversation-server binds its WebSocket listener to.
    pub listen_port: u16,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub pipeline: PipelineConfig,
    pub providers: ProvidersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            pipeline: PipelineConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

/// Negotiated audio parameters (§4.1, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub telephony_sample_rate: u32,
    pub telephony_encoding: Encoding,
    pub frame_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            telephony_sample_rate: 8_000,
            telephony_encoding: Encoding::Mulaw,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

/// Voice activity detection tunables (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub min_speech_ms: u32,
    pub silence_hangover_ms: u32,
    pub barge_in_min_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_speech_ms: DEFAULT_MIN_SPEECH_MS,
            silence_hangover_ms: DEFAULT_SILENCE_HANGOVER_MS,
            barge_in_min_ms: DEFAULT_BARGE_IN_MIN_MS,
        }
    }
}

impl From<VadConfig> for crate::vad::VadConfig {
    fn from(cfg: VadConfig) -> Self {
        crate::vad::VadConfig {
            min_speech_ms: cfg.min_speech_ms,
            silence_hangover_ms: cfg.silence_hangover_ms,
            barge_in_min_ms: cfg.barge_in_min_ms,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

/// Conversation pipeline tunables (§4.6, §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stt_deadline_ms: u64,
    pub max_chunk_chars: usize,
    pub history_max_turns: usize,
    pub tx_high_watermark: usize,
    pub tx_low_watermark: usize,
    pub backpressure_timeout_ms: u64,
    pub cancel_deadline_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stt_deadline_ms: DEFAULT_STT_DEADLINE_MS,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            history_max_turns: DEFAULT_HISTORY_MAX_TURNS,
            tx_high_watermark: TX_HIGH_WATERMARK,
            tx_low_watermark: TX_LOW_WATERMARK,
            backpressure_timeout_ms: BACKPRESSURE_TIMEOUT_MS,
            cancel_deadline_ms: CANCEL_DEADLINE_MS,
        }
    }
}

impl From<PipelineConfig> for crate::pipeline::PipelineConfig {
    fn from(cfg: PipelineConfig) -> Self {
        crate::pipeline::PipelineConfig {
            stt_deadline_ms: cfg.stt_deadline_ms,
            max_chunk_chars: cfg.max_chunk_chars,
            history_max_turns: cfg.history_max_turns,
            tx_high_watermark: cfg.tx_high_watermark,
            tx_low_watermark: cfg.tx_low_watermark,
            backpressure_timeout_ms: cfg.backpressure_timeout_ms,
        }
    }
}

/// Which provider adapters to wire up. The reference binaries only know how
/// to construct the built-in reference providers (§10.6); this flag exists
/// so a deployment's config file can be explicit about using them rather
/// than silently defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub kind: ProviderKind,
    pub voice: Option<String>,
    pub language: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Reference,
            voice: None,
            language: None,
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file, if given, then applies
    /// `ASP_`-prefixed environment overrides, mirroring the reference
    /// server's `ServerConfig::load`.
    pub fn load(path: Option<&Path>) -> AspResult<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    AspError::Configuration(format!("reading {}: {e}", path.display()))
                })?;
                serde_yaml::from_str(&content).map_err(|e| {
                    AspError::Configuration(format!("parsing {}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ASP_LISTEN_PORT") {
            if let Ok(port) = val.parse() {
                self.listen_port = port;
            }
        }
        if let Ok(val) = std::env::var("ASP_SILENCE_HANGOVER_MS") {
            if let Ok(ms) = val.parse() {
                self.vad.silence_hangover_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("ASP_STT_DEADLINE_MS") {
            if let Ok(ms) = val.parse() {
                self.pipeline.stt_deadline_ms = ms;
            }
        }
    }

    /// Range/enum checks beyond what the type system already guarantees.
    pub fn validate(&self) -> AspResult<()> {
        if self.audio.frame_ms == 0 {
            return Err(AspError::Configuration("audio.frame_ms must be >= 1".into()));
        }
        if self.vad.barge_in_min_ms == 0 {
            return Err(AspError::Configuration(
                "vad.barge_in_min_ms must be >= 1, or barge-in never arms".into(),
            ));
        }
        if self.pipeline.tx_low_watermark >= self.pipeline.tx_high_watermark {
            return Err(AspError::Configuration(
                "pipeline.tx_low_watermark must be below tx_high_watermark".into(),
            ));
        }
        if self.pipeline.max_chunk_chars == 0 {
            return Err(AspError::Configuration(
                "pipeline.max_chunk_chars must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
