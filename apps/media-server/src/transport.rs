//! `Transport` over a `tokio-tungstenite` client connection: the media
//! server speaks ASP as a client of the conversation server's `/ws`
//! listener (§6).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use asp_core::{AspError, AspResult, ControlMessage, Transport, TransportMessage};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Owns one outbound WebSocket connection to a conversation server.
pub struct TungsteniteTransport {
    tx: WsSink,
    rx: WsSource,
}

impl TungsteniteTransport {
    /// Connects to `url` (e.g. `ws://127.0.0.1:8765/ws`).
    pub async fn connect(url: &str) -> AspResult<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| AspError::TransportLoss(format!("connect to {url} failed: {e}")))?;
        let (tx, rx) = stream.split();
        Ok(Self { tx, rx })
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send_control(&mut self, msg: ControlMessage) -> AspResult<()> {
        let text = serde_json::to_string(&msg)
            .map_err(|e| AspError::Internal(format!("control message encode failed: {e}")))?;
        self.tx
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| AspError::TransportLoss(format!("send_control failed: {e}")))
    }

    async fn send_audio(&mut self, frame: Bytes) -> AspResult<()> {
        self.tx
            .send(WsMessage::Binary(frame))
            .await
            .map_err(|e| AspError::TransportLoss(format!("send_audio failed: {e}")))
    }

    async fn recv(&mut self) -> AspResult<Option<TransportMessage>> {
        loop {
            let Some(msg) = self.rx.next().await else {
                return Ok(None);
            };
            let msg = msg.map_err(|e| AspError::TransportLoss(format!("recv failed: {e}")))?;
            match msg {
                WsMessage::Text(text) => {
                    let control: ControlMessage = serde_json::from_str(&text).map_err(|e| {
                        AspError::ProtocolViolation(format!("bad control message: {e}"))
                    })?;
                    return Ok(Some(TransportMessage::Control(control)));
                }
                WsMessage::Binary(bytes) => {
                    return Ok(Some(TransportMessage::Audio(Bytes::from(bytes))));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> AspResult<()> {
        self.tx
            .close()
            .await
            .map_err(|e| AspError::TransportLoss(format!("close failed: {e}")))
    }
}
