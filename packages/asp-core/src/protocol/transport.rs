//! Transport abstraction: one bidirectional, ordered, message-preserving
//! duplex channel per Session (§4.3, §6). The reference transport is a
//! WebSocket; `asp-core` depends only on this trait so the session
//! supervisor (C4) and pipeline (C6) are transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;

use super::control::ControlMessage;
use crate::error::AspResult;

/// One message observed on the wire, in the order it was sent (§5: control
/// messages and audio frames share strict FIFO on one transport).
#[derive(Debug, Clone)]
pub enum TransportMessage {
    Control(ControlMessage),
    Audio(Bytes),
}

/// A bidirectional, ordered, reliable, message-preserving duplex channel.
///
/// Implementations: an axum WebSocket split sink/stream pair (server side),
/// a `tokio-tungstenite` client connection (media-server side), or an
/// in-memory duplex pair for tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a control message as a text message.
    async fn send_control(&mut self, msg: ControlMessage) -> AspResult<()>;

    /// Sends a raw binary audio message (header + payload already encoded).
    async fn send_audio(&mut self, frame: Bytes) -> AspResult<()>;

    /// Receives the next message, or `None` on graceful close.
    async fn recv(&mut self) -> AspResult<Option<TransportMessage>>;

    /// Closes the transport.
    async fn close(&mut self) -> AspResult<()>;
}
