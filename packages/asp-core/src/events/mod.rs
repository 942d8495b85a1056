//! Event system for observing session activity.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEvent`] and its per-category variants
//!
//! The transport implementation (WebSocket control messages, metrics
//! exporters, whatever a host application wires up) lives outside this
//! crate; [`crate::events::bridge::BroadcastEventBridge`] only fans events
//! out to in-process subscribers.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to in-process observers of a running session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events about a Session's lifecycle and state transitions.
    Session(SessionEvent),

    /// Events about a Response's lifecycle.
    Response(ResponseEvent),

    /// Events from the voice activity detector.
    Vad(VadEvent),

    /// Backpressure and jitter-buffer events.
    Backpressure(BackpressureEvent),
}

/// Events related to Session lifecycle and state transitions (§4.4).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A session was accepted and is now `Active/Listening`.
    Started {
        session_id: String,
        timestamp: u64,
    },
    /// The session's state machine transitioned.
    StateChanged {
        session_id: String,
        from: String,
        to: String,
        timestamp: u64,
    },
    /// The session ended, gracefully or otherwise.
    Ended {
        session_id: String,
        frames_in: u64,
        frames_out: u64,
        utterances: u64,
        barge_ins: u64,
        timestamp: u64,
    },
}

/// Events related to a Response's lifecycle (§3, §4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseEvent {
    /// A response began generating for an utterance.
    Generating {
        session_id: String,
        response_id: String,
        utterance_id: String,
        timestamp: u64,
    },
    /// The first outbound frame was handed to the transport.
    Streaming {
        session_id: String,
        response_id: String,
        first_audio_latency_ms: u64,
        timestamp: u64,
    },
    /// The response completed normally.
    Done {
        session_id: String,
        response_id: String,
        audio_bytes: u64,
        timestamp: u64,
    },
    /// The response was aborted by barge-in, timeout, or provider failure.
    Cancelled {
        session_id: String,
        response_id: String,
        reason: String,
        timestamp: u64,
    },
}

/// Events from the voice activity detector (§4.2).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VadEvent {
    SpeechBegin {
        session_id: String,
        utterance_id: String,
        timestamp: u64,
    },
    SpeechEnd {
        session_id: String,
        utterance_id: String,
        frame_count: u64,
        timestamp: u64,
    },
    BargeIn {
        session_id: String,
        cancelled_response_id: String,
        timestamp: u64,
    },
}

/// Backpressure and jitter-buffer events (§4.5, §5).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackpressureEvent {
    /// The server's transport-writer queue crossed `tx_high_watermark`.
    TxQueueHigh {
        session_id: String,
        queue_len: usize,
        timestamp: u64,
    },
    /// The queue drained back below `tx_low_watermark`.
    TxQueueDrained {
        session_id: String,
        timestamp: u64,
    },
    /// The client's jitter buffer overflowed and dropped the oldest frame.
    JitterBufferOverflow {
        session_id: String,
        dropped_seq: u32,
        timestamp: u64,
    },
    /// The client's jitter buffer underran and silence was injected.
    JitterBufferUnderrun {
        session_id: String,
        timestamp: u64,
    },
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<ResponseEvent> for BroadcastEvent {
    fn from(event: ResponseEvent) -> Self {
        BroadcastEvent::Response(event)
    }
}

impl From<VadEvent> for BroadcastEvent {
    fn from(event: VadEvent) -> Self {
        BroadcastEvent::Vad(event)
    }
}

impl From<BackpressureEvent> for BroadcastEvent {
    fn from(event: BackpressureEvent) -> Self {
        BroadcastEvent::Backpressure(event)
    }
}
