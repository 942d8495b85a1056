//! Binary audio frame header (§6): `{stream_id: u32, seq: u32, timestamp_ms: u32, flags: u8}`,
//! big-endian, 13 bytes, followed by the codec payload.

use bytes::{Bytes, BytesMut};

use crate::error::{AspError, AspResult};
use crate::protocol_constants::AUDIO_FRAME_HEADER_LEN;

pub use crate::protocol_constants::FRAME_FLAG_END_OF_STREAM as FLAG_END_OF_STREAM;

/// A parsed binary audio frame: header fields plus the raw codec payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub stream_id: u32,
    pub seq: u32,
    pub timestamp_ms: u32,
    pub flags: u8,
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn new(stream_id: u32, seq: u32, timestamp_ms: u32, payload: Bytes) -> Self {
        Self {
            stream_id,
            seq,
            timestamp_ms,
            flags: 0,
            payload,
        }
    }

    pub fn end_of_stream(mut self) -> Self {
        self.flags |= FLAG_END_OF_STREAM;
        self
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & FLAG_END_OF_STREAM != 0
    }

    /// Encodes the header + payload into one binary WebSocket message.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(AUDIO_FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(&[self.flags]);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Parses a binary WebSocket message into a frame. Fails if shorter than
    /// the fixed header.
    pub fn decode(mut raw: Bytes) -> AspResult<Self> {
        if raw.len() < AUDIO_FRAME_HEADER_LEN {
            return Err(AspError::ProtocolViolation(format!(
                "audio frame shorter than header: {} bytes",
                raw.len()
            )));
        }
        let header = raw.split_to(AUDIO_FRAME_HEADER_LEN);
        let stream_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let seq = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let timestamp_ms = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let flags = header[12];
        Ok(Self {
            stream_id,
            seq,
            timestamp_ms,
            flags,
            payload: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let frame = AudioFrame::new(7, 42, 840, Bytes::from_static(&[1, 2, 3, 4]));
        let encoded = frame.encode();
        assert_eq!(encoded.len(), AUDIO_FRAME_HEADER_LEN + 4);

        let decoded = AudioFrame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn end_of_stream_flag_round_trips() {
        let frame = AudioFrame::new(1, 0, 0, Bytes::new()).end_of_stream();
        let decoded = AudioFrame::decode(frame.encode()).unwrap();
        assert!(decoded.is_end_of_stream());
    }

    #[test]
    fn rejects_short_buffer() {
        let err = AudioFrame::decode(Bytes::from_static(&[0, 1, 2])).unwrap_err();
        assert!(matches!(err, AspError::ProtocolViolation(_)));
    }

    #[test]
    fn pcm_8khz_20ms_payload_is_320_bytes_per_wire_example() {
        let frame = AudioFrame::new(1, 0, 0, Bytes::from(vec![0u8; 320]));
        assert_eq!(frame.encode().len(), AUDIO_FRAME_HEADER_LEN + 320);
    }
}
