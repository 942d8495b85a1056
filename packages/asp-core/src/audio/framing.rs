//! Reframing buffer: accumulates arbitrary-sized byte chunks from a capture
//! device or transport and emits fixed-size frames (§4.1).
//!
//! A trailing partial frame is held until enough bytes arrive to complete
//! it, so downstream consumers (VAD, codec adapter) never see a short frame.

use bytes::{Bytes, BytesMut};

/// Buffers bytes and yields fixed-size frames as soon as they're complete.
pub struct Reframer {
    frame_bytes: usize,
    buffer: BytesMut,
}

impl Reframer {
    pub fn new(frame_bytes: usize) -> Self {
        assert!(frame_bytes > 0, "frame_bytes must be non-zero");
        Self {
            frame_bytes,
            buffer: BytesMut::new(),
        }
    }

    /// Appends newly captured or received bytes to the internal buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drains every complete frame currently buffered, leaving any trailing
    /// partial frame in place for the next `push`.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_bytes);
        while self.buffer.len() >= self.frame_bytes {
            let frame = self.buffer.split_to(self.frame_bytes);
            frames.push(frame.freeze());
        }
        frames
    }

    /// Bytes currently held that don't yet form a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_no_frames_until_enough_bytes() {
        let mut r = Reframer::new(320);
        r.push(&[0u8; 100]);
        assert!(r.drain_frames().is_empty());
        assert_eq!(r.pending_bytes(), 100);
    }

    #[test]
    fn yields_exactly_complete_frames_and_holds_remainder() {
        let mut r = Reframer::new(320);
        r.push(&[1u8; 700]);
        let frames = r.drain_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(r.pending_bytes(), 60);
    }

    #[test]
    fn accumulates_across_multiple_pushes() {
        let mut r = Reframer::new(320);
        r.push(&[1u8; 200]);
        assert!(r.drain_frames().is_empty());
        r.push(&[1u8; 150]);
        let frames = r.drain_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(r.pending_bytes(), 30);
    }
}
