//! μ-law / A-law / linear PCM transcoding and sample-rate conversion (§4.1).
//!
//! Telephony legs speak 8 kHz mono in one of three encodings; the
//! conversation pipeline's providers speak 16 kHz mono linear PCM. A
//! [`CodecAdapter`] sits on the media-server side of the wire and converts
//! in both directions, resampling 8 kHz <-> 16 kHz with simple linear
//! interpolation (no external resampling crate pulled in for one cheap,
//! well-understood ratio).

use bytes::Bytes;

use super::framing::Reframer;
use super::{AudioFormat, Encoding};
use crate::error::{AspError, AspResult};

const BIAS: i16 = 0x84;
const CLIP: i16 = 32_635;

/// μ-law and A-law codecs, decoded to/from 16-bit linear PCM.
///
/// This is the same shape as a transcoder: one encode direction, one decode
/// direction, operating on whole frames.
pub trait Codec: Send + Sync {
    /// Decodes telephony-codec bytes to 16-bit linear PCM samples.
    fn decode(&self, input: &[u8]) -> Vec<i16>;

    /// Encodes 16-bit linear PCM samples to telephony-codec bytes.
    fn encode(&self, samples: &[i16]) -> Bytes;
}

/// Linear PCM passthrough: samples are already in the target representation.
pub struct PcmCodec;

impl Codec for PcmCodec {
    fn decode(&self, input: &[u8]) -> Vec<i16> {
        input
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    fn encode(&self, samples: &[i16]) -> Bytes {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Bytes::from(out)
    }
}

/// ITU-T G.711 μ-law codec.
pub struct MulawCodec;

impl Codec for MulawCodec {
    fn decode(&self, input: &[u8]) -> Vec<i16> {
        input.iter().map(|&b| mulaw_to_linear(b)).collect()
    }

    fn encode(&self, samples: &[i16]) -> Bytes {
        Bytes::from(samples.iter().map(|&s| linear_to_mulaw(s)).collect::<Vec<u8>>())
    }
}

/// ITU-T G.711 A-law codec.
pub struct AlawCodec;

impl Codec for AlawCodec {
    fn decode(&self, input: &[u8]) -> Vec<i16> {
        input.iter().map(|&b| alaw_to_linear(b)).collect()
    }

    fn encode(&self, samples: &[i16]) -> Bytes {
        Bytes::from(samples.iter().map(|&s| linear_to_alaw(s)).collect::<Vec<u8>>())
    }
}

fn codec_for(encoding: Encoding) -> Box<dyn Codec> {
    match encoding {
        Encoding::PcmS16le => Box::new(PcmCodec),
        Encoding::Mulaw => Box::new(MulawCodec),
        Encoding::Alaw => Box::new(AlawCodec),
    }
}

/// Converts frames between a telephony [`AudioFormat`] and the agent's
/// 16 kHz linear PCM format, resampling as needed.
///
/// One `CodecAdapter` is constructed per session's negotiated telephony
/// format and reused for every frame in that session (§4.1, §5).
pub struct CodecAdapter {
    telephony: AudioFormat,
    agent: AudioFormat,
    telephony_codec: Box<dyn Codec>,
    reframer: Reframer,
}

impl CodecAdapter {
    pub fn new(telephony: AudioFormat) -> Self {
        let agent = AudioFormat::agent_pcm(telephony.frame_ms);
        Self {
            telephony_codec: codec_for(telephony.encoding),
            reframer: Reframer::new(telephony.frame_bytes()),
            telephony,
            agent,
        }
    }

    /// Buffers an arbitrary-sized chunk of raw telephony bytes and returns
    /// every frame now complete at the adapter's negotiated frame size; a
    /// trailing partial frame stays buffered for the next call. Two
    /// `CodecAdapter`s (and so two framing buffers) never share a stream.
    pub fn reframe(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.reframer.push(chunk);
        self.reframer.drain_frames()
    }

    pub fn agent_format(&self) -> AudioFormat {
        self.agent
    }

    pub fn telephony_format(&self) -> AudioFormat {
        self.telephony
    }

    /// Decodes an inbound telephony frame and resamples it to 16 kHz PCM
    /// bytes for the STT provider.
    pub fn to_agent(&self, telephony_frame: &[u8]) -> AspResult<Bytes> {
        if telephony_frame.len() != self.telephony.frame_bytes() {
            return Err(AspError::FrameMisaligned(format!(
                "expected {} bytes, got {}",
                self.telephony.frame_bytes(),
                telephony_frame.len()
            )));
        }
        let samples = self.telephony_codec.decode(telephony_frame);
        let resampled = resample(&samples, self.telephony.sample_rate, self.agent.sample_rate);
        Ok(PcmCodec.encode(&resampled))
    }

    /// Resamples a 16 kHz PCM frame from the TTS provider down to the
    /// telephony rate and encodes it for the outbound wire.
    pub fn from_agent(&self, agent_pcm_frame: &[u8]) -> AspResult<Bytes> {
        if agent_pcm_frame.len() != self.agent.frame_bytes() {
            return Err(AspError::FrameMisaligned(format!(
                "expected {} bytes, got {}",
                self.agent.frame_bytes(),
                agent_pcm_frame.len()
            )));
        }
        let samples = PcmCodec.decode(agent_pcm_frame);
        let resampled = resample(&samples, self.agent.sample_rate, self.telephony.sample_rate);
        Ok(self.telephony_codec.encode(&resampled))
    }
}

/// Linear-interpolation resampler. Adequate for the single 8kHz<->16kHz
/// ratio ASP needs; not a general-purpose resampler.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;
        let a = samples[idx.min(samples.len() - 1)] as f64;
        let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}

fn mulaw_to_linear(u_val: u8) -> i16 {
    let u_val = !u_val;
    let t = (((u_val & 0x0F) as i16) << 3) + BIAS;
    let t = t << ((u_val & 0x70) >> 4);
    if u_val & 0x80 != 0 {
        BIAS - t
    } else {
        t - BIAS
    }
}

fn linear_to_mulaw(pcm: i16) -> u8 {
    let sign = if pcm < 0 { 0x80u8 } else { 0 };
    let mut magnitude = if pcm < 0 { -(pcm as i32) } else { pcm as i32 } as i16;
    magnitude = magnitude.saturating_add(BIAS).min(CLIP);

    let mut exponent: i16 = 7;
    let mut mask: i16 = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

fn alaw_to_linear(a_val: u8) -> i16 {
    let a_val = a_val ^ 0x55;
    let sign = a_val & 0x80;
    let exponent = (a_val & 0x70) >> 4;
    let mantissa = (a_val & 0x0F) as i16;

    let mut sample = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    if sign == 0 {
        sample = -sample;
    }
    sample
}

fn linear_to_alaw(pcm: i16) -> u8 {
    let sign = if pcm >= 0 { 0x80u8 } else { 0 };
    let magnitude = if pcm >= 0 { pcm } else { (-(pcm as i32)).min(i16::MAX as i32) as i16 };
    let magnitude = magnitude.min(CLIP) >> 3;

    let (exponent, mantissa) = if magnitude > 0x0F {
        let mut exp: i16 = 1;
        let mut m = magnitude;
        while m > 0x1F && exp < 7 {
            m >>= 1;
            exp += 1;
        }
        (exp, (m >> 1) & 0x0F)
    } else {
        (0, magnitude & 0x0F)
    };

    (sign | ((exponent as u8) << 4) | mantissa as u8) ^ 0x55
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trip_is_lossy_but_close() {
        for pcm in [-10_000i16, -500, 0, 500, 10_000, 30_000] {
            let encoded = linear_to_mulaw(pcm);
            let decoded = mulaw_to_linear(encoded);
            assert!(
                (decoded as i32 - pcm as i32).abs() < 512,
                "pcm={pcm} decoded={decoded}"
            );
        }
    }

    #[test]
    fn alaw_round_trip_is_lossy_but_close() {
        for pcm in [-10_000i16, -500, 0, 500, 10_000, 30_000] {
            let encoded = linear_to_alaw(pcm);
            let decoded = alaw_to_linear(encoded);
            assert!(
                (decoded as i32 - pcm as i32).abs() < 512,
                "pcm={pcm} decoded={decoded}"
            );
        }
    }

    #[test]
    fn resample_upsamples_8k_to_16k() {
        let samples = vec![0i16, 100, 200, 300];
        let out = resample(&samples, 8_000, 16_000);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn resample_downsamples_16k_to_8k() {
        let samples = vec![0i16; 320];
        let out = resample(&samples, 16_000, 8_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn adapter_rejects_misaligned_frame() {
        let adapter = CodecAdapter::new(AudioFormat::new(8_000, Encoding::PcmS16le, 20));
        let err = adapter.to_agent(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, AspError::FrameMisaligned(_)));
    }

    #[test]
    fn adapter_round_trips_pcm_frame_sizes() {
        let adapter = CodecAdapter::new(AudioFormat::new(8_000, Encoding::PcmS16le, 20));
        let telephony_frame = vec![0u8; adapter.telephony_format().frame_bytes()];
        let agent_bytes = adapter.to_agent(&telephony_frame).unwrap();
        assert_eq!(agent_bytes.len(), adapter.agent_format().frame_bytes());

        let back = adapter.from_agent(&agent_bytes).unwrap();
        assert_eq!(back.len(), adapter.telephony_format().frame_bytes());
    }

    #[test]
    fn adapter_round_trips_mulaw_frame_sizes() {
        let adapter = CodecAdapter::new(AudioFormat::new(8_000, Encoding::Mulaw, 20));
        let telephony_frame = vec![0xFFu8; adapter.telephony_format().frame_bytes()];
        let agent_bytes = adapter.to_agent(&telephony_frame).unwrap();
        assert_eq!(agent_bytes.len(), adapter.agent_format().frame_bytes());

        let back = adapter.from_agent(&agent_bytes).unwrap();
        assert_eq!(back.len(), adapter.telephony_format().frame_bytes());
    }

    #[test]
    fn reframe_concatenates_back_to_original_up_to_trailing_partial() {
        let mut adapter = CodecAdapter::new(AudioFormat::new(8_000, Encoding::PcmS16le, 20));
        let frame_bytes = adapter.telephony_format().frame_bytes();
        let stream: Vec<u8> = (0..(frame_bytes * 3 + frame_bytes / 2) as u32)
            .map(|i| (i % 251) as u8)
            .collect();

        // Deliver the stream in irregular chunks, as a real capture path
        // would, not aligned to the frame boundary.
        let mut emitted = Vec::new();
        for chunk in stream.chunks(37) {
            emitted.extend(adapter.reframe(chunk));
        }

        assert_eq!(emitted.len(), 3);
        let reconstructed: Vec<u8> = emitted.iter().flat_map(|f| f.to_vec()).collect();
        assert_eq!(&reconstructed[..], &stream[..frame_bytes * 3]);
    }
}
