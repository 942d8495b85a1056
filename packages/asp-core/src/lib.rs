//! ASP Core - shared library for the Audio Session Protocol.
//!
//! This crate provides the core functionality shared between the two ASP
//! endpoints: a conversation server (hosts the WebSocket listener, runs the
//! conversation pipeline) and a media server (drives a telephony leg,
//! capturing and playing out audio over the same protocol).
//!
//! # Architecture
//!
//! - [`protocol`]: wire framing and control-message codec (C3)
//! - [`audio`]: codec adapter, resampling, reframing (C1)
//! - [`vad`]: voice activity detection and barge-in timing (C2)
//! - [`session`]: per-call session state machine (C4)
//! - [`media`]: telephony-leg channel, call control, playout pacer (C5)
//! - [`providers`]: STT/LLM/TTS provider traits and reference adapters (C7)
//! - [`pipeline`]: conversation orchestration tying C2/C6/C7 together
//! - [`events`]: domain event system for observability
//! - [`config`]: deployment configuration
//! - [`error`]: centralized error types
//! - [`bootstrap`]: composition root wiring the above into running services
//! - [`api`]: the conversation-server's axum WebSocket transport

#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod pipeline;
pub mod protocol;
pub mod protocol_constants;
pub mod providers;
pub mod session;
pub mod vad;

pub use audio::{AudioFormat, Codec, CodecAdapter, Encoding, Reframer};
pub use config::Config;
pub use error::{AspError, AspResult, ErrorLocality};
pub use events::{
    BackpressureEvent, BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter,
    NoopEventEmitter, ResponseEvent, SessionEvent, VadEvent,
};
pub use media::{CallControl, JitterBuffer, MediaChannel, NoopCallControl, PlayoutPacer, SimulatedMediaChannel};
pub use pipeline::{ConversationContext, ConversationPipeline, ResponseOutcome, SentenceChunker};
pub use protocol::{AudioFrame, AudioParams, ControlMessage, Transport, TransportMessage, VadParams};
pub use providers::{GenerationEvent, LanguageModel, Message, Role, SpeechToText, TextToSpeech, TranscriptEvent};
pub use session::{Session, SessionState, SessionSummary};
pub use vad::{ListenMode, VadSignal, VoiceActivityDetector};

pub use api::{start_server, AppState, AppStateBuilder, ServerError, WsConnectionManager};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
