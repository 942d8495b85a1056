//! Bridge implementation that maps domain events to a broadcast channel.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! (session supervisor, pipeline) and observability concerns, fanning typed
//! domain events out to any number of in-process subscribers (a WebSocket
//! relay, a metrics collector, a test harness).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BackpressureEvent, BroadcastEvent, ResponseEvent, SessionEvent, VadEvent};

/// Bridges domain events to an in-process broadcast channel.
///
/// This adapter implements [`EventEmitter`] by forwarding events to a
/// `tokio::sync::broadcast` channel. An optional external emitter can be
/// layered on top (e.g. to additionally push events into a tracing span
/// or a metrics sink) without the emitting call site knowing either exists.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives a copy of every emitted event.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<BroadcastEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] no broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_response, ResponseEvent, Response);
    impl_emit!(emit_vad, VadEvent, Vad);
    impl_emit!(emit_backpressure, BackpressureEvent, Backpressure);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_to_broadcast_channel() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_session(SessionEvent::Started {
            session_id: "s1".into(),
            timestamp: 0,
        });

        let received = rx.try_recv().expect("event delivered");
        matches!(received, BroadcastEvent::Session(SessionEvent::Started { .. }));
    }
}
