//! Audio frame & codec adapter (C1, §4.1).
//!
//! Converts between linear PCM (agent-side: 16 kHz mono s16le) and the
//! telephony codec (8 kHz mono s16le, μ-law, or A-law), resamples between
//! 8 kHz and 16 kHz, and reframes a byte stream to fixed-duration frames.

mod codec;
mod framing;

pub use codec::{Codec, CodecAdapter};
pub use framing::Reframer;

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::protocol_constants::DEFAULT_FRAME_MS;

/// Encodings negotiable over ASP (§6 configuration, `audio.encoding`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    PcmS16le,
    Mulaw,
    Alaw,
}

impl Encoding {
    /// Bytes occupied by one sample of this encoding.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Encoding::PcmS16le => 2,
            Encoding::Mulaw | Encoding::Alaw => 1,
        }
    }
}

/// Mono PCM or telephony-codec audio format: sample rate plus frame duration.
///
/// ASP audio is always single-channel (§3, §4.1); there is no channel count
/// to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: Encoding,
    pub frame_ms: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, encoding: Encoding, frame_ms: u32) -> Self {
        Self {
            sample_rate,
            encoding,
            frame_ms,
        }
    }

    /// Agent-side format: 16 kHz mono linear PCM, the format STT/TTS consume.
    pub fn agent_pcm(frame_ms: u32) -> Self {
        Self::new(16_000, Encoding::PcmS16le, frame_ms)
    }

    /// Number of samples in one frame of `frame_ms` duration.
    #[inline]
    pub fn frame_samples(&self) -> usize {
        ((self.sample_rate as u64 * self.frame_ms as u64) / 1000) as usize
    }

    /// Size in bytes of one frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.encoding.bytes_per_sample()
    }

    /// A cached, zero-filled frame of this format's size (digital silence).
    pub fn silence_frame(&self) -> Bytes {
        get_or_create_silence(self.frame_bytes())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(8_000, Encoding::PcmS16le, DEFAULT_FRAME_MS)
    }
}

/// Global cache for silence frames to avoid repeated allocations on underrun.
static SILENCE_CACHE: OnceLock<RwLock<HashMap<usize, Bytes>>> = OnceLock::new();

fn get_or_create_silence(byte_len: usize) -> Bytes {
    let cache = SILENCE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(silence) = cache.read().get(&byte_len) {
        return silence.clone();
    }

    let mut cache_write = cache.write();
    if let Some(silence) = cache_write.get(&byte_len) {
        return silence.clone();
    }

    let silence = Bytes::from(vec![0u8; byte_len]);
    cache_write.insert(byte_len, silence.clone());
    silence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_pcm_8khz_20ms() {
        let fmt = AudioFormat::new(8_000, Encoding::PcmS16le, 20);
        // 8000 * 0.020 = 160 samples * 2 bytes = 320 bytes, matches §6's example.
        assert_eq!(fmt.frame_bytes(), 320);
    }

    #[test]
    fn frame_bytes_mulaw_8khz_20ms() {
        let fmt = AudioFormat::new(8_000, Encoding::Mulaw, 20);
        assert_eq!(fmt.frame_bytes(), 160);
    }

    #[test]
    fn frame_bytes_agent_pcm_16khz_20ms() {
        let fmt = AudioFormat::agent_pcm(20);
        assert_eq!(fmt.frame_bytes(), 640);
    }

    #[test]
    fn silence_frame_is_zeroed_and_cached() {
        let fmt = AudioFormat::new(8_000, Encoding::PcmS16le, 20);
        let a = fmt.silence_frame();
        let b = fmt.silence_frame();
        assert_eq!(a.len(), 320);
        assert!(a.iter().all(|&b| b == 0));
        assert_eq!(a.as_ptr(), b.as_ptr(), "silence frames of equal size are cached");
    }
}
