//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative observability backends.

use super::{BackpressureEvent, ResponseEvent, SessionEvent, VadEvent};

/// Trait for emitting domain events without knowledge of how they're observed.
///
/// A host application wires this to metrics, tracing exporters, or a
/// WebSocket fan-out; the pipeline and session supervisor only depend on
/// this trait.
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a response lifecycle event.
    fn emit_response(&self, event: ResponseEvent);

    /// Emits a VAD event (speech boundaries, barge-in).
    fn emit_vad(&self, event: VadEvent);

    /// Emits a backpressure or jitter-buffer event.
    fn emit_backpressure(&self, event: BackpressureEvent);
}

/// No-op emitter for tests or headless deployments with no observability backend.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_response(&self, _event: ResponseEvent) {}
    fn emit_vad(&self, _event: VadEvent) {}
    fn emit_backpressure(&self, _event: BackpressureEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level via `tracing`.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_response(&self, event: ResponseEvent) {
        tracing::debug!(?event, "response_event");
    }

    fn emit_vad(&self, event: VadEvent) {
        tracing::debug!(?event, "vad_event");
    }

    fn emit_backpressure(&self, event: BackpressureEvent) {
        tracing::debug!(?event, "backpressure_event");
    }
}
