//! Telephony integration (§6, §10.7): the abstract `MediaChannel` the Media
//! Server driver (C5) consumes, plus a reference in-process implementation
//! so `apps/media-server` runs without a SIP/RTP stack.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::audio::AudioFormat;
use crate::error::AspResult;

/// Capability the Media Server driver (C5) depends on for the call leg.
/// A real implementation speaks SIP/RTP; this crate ships only
/// [`SimulatedMediaChannel`] (§10.7).
#[async_trait]
pub trait MediaChannel: Send + Sync {
    /// Blocks until the next capture frame is available.
    async fn read_frame(&self) -> AspResult<Bytes>;

    /// Hands a frame to the telephony playout path.
    async fn write_frame(&self, frame: Bytes) -> AspResult<()>;

    async fn close(&self) -> AspResult<()>;

    fn format(&self) -> AudioFormat;

    fn channel_id(&self) -> &str;
}

/// In-process `MediaChannel`: capture is a fixed low-level tone (or silence),
/// playout frames are captured into a buffer for inspection (tests) or
/// simply discarded (production-shaped default run).
pub struct SimulatedMediaChannel {
    channel_id: String,
    format: AudioFormat,
    capture_rx: Mutex<mpsc::Receiver<Bytes>>,
    capture_tx: mpsc::Sender<Bytes>,
    played: Mutex<Vec<Bytes>>,
    phase: AtomicU32,
    tone_amplitude: i16,
}

impl SimulatedMediaChannel {
    /// Creates a channel that synthesises a constant-amplitude tone as
    /// capture audio, advancing its generator every [`read_frame`] call.
    pub fn tone(channel_id: impl Into<String>, format: AudioFormat, tone_amplitude: i16) -> Self {
        let (capture_tx, capture_rx) = mpsc::channel(8);
        Self {
            channel_id: channel_id.into(),
            format,
            capture_rx: Mutex::new(capture_rx),
            capture_tx,
            played: Mutex::new(Vec::new()),
            phase: AtomicU32::new(0),
            tone_amplitude,
        }
    }

    pub fn silence(channel_id: impl Into<String>, format: AudioFormat) -> Self {
        Self::tone(channel_id, format, 0)
    }

    /// Synthesises and enqueues the next capture frame. In a real deployment
    /// this would be driven by the SIP/RTP receive path; here the driver
    /// loop calls it on the pacer's cadence.
    pub fn generate_capture_frame(&self) {
        let samples = self.format.frame_samples();
        let mut buf = Vec::with_capacity(samples * 2);
        let mut phase = self.phase.load(Ordering::Relaxed);
        for _ in 0..samples {
            let sample = if self.tone_amplitude == 0 {
                0i16
            } else {
                let radians = (phase as f32) * 0.2;
                (radians.sin() * self.tone_amplitude as f32) as i16
            };
            buf.extend_from_slice(&sample.to_le_bytes());
            phase = phase.wrapping_add(1);
        }
        self.phase.store(phase, Ordering::Relaxed);
        let _ = self.capture_tx.try_send(Bytes::from(buf));
    }

    /// Frames handed to playout so far (test inspection hook).
    pub fn played_frames(&self) -> Vec<Bytes> {
        self.played.lock().clone()
    }
}

#[async_trait]
impl MediaChannel for SimulatedMediaChannel {
    async fn read_frame(&self) -> AspResult<Bytes> {
        let mut rx = self.capture_rx.lock();
        match rx.try_recv() {
            Ok(frame) => Ok(frame),
            Err(_) => Ok(self.format.silence_frame()),
        }
    }

    async fn write_frame(&self, frame: Bytes) -> AspResult<()> {
        self.played.lock().push(frame);
        Ok(())
    }

    async fn close(&self) -> AspResult<()> {
        Ok(())
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Encoding;

    #[tokio::test]
    async fn silence_channel_reads_zeroed_frames() {
        let channel = SimulatedMediaChannel::silence(
            "call-1",
            AudioFormat::new(8_000, Encoding::PcmS16le, 20),
        );
        let frame = channel.read_frame().await.unwrap();
        assert_eq!(frame.len(), 320);
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn played_frames_accumulate() {
        let channel = SimulatedMediaChannel::silence(
            "call-1",
            AudioFormat::new(8_000, Encoding::PcmS16le, 20),
        );
        channel.write_frame(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        channel.write_frame(Bytes::from_static(&[4, 5, 6])).await.unwrap();
        assert_eq!(channel.played_frames().len(), 2);
    }

    #[tokio::test]
    async fn generated_tone_frame_is_nonzero() {
        let channel =
            SimulatedMediaChannel::tone("call-1", AudioFormat::new(8_000, Encoding::PcmS16le, 20), 5000);
        channel.generate_capture_frame();
        let frame = channel.read_frame().await.unwrap();
        assert!(frame.iter().any(|&b| b != 0));
    }
}
