//! Per-frame speech/non-speech/noise classification (§4.2).
//!
//! The detector in [`super::VoiceActivityDetector`] is polymorphic over this
//! trait so an energy-based classifier can later be swapped for a neural
//! one without touching the hangover-timer state machine.

use std::collections::VecDeque;

use crate::protocol_constants::{RMS_ADAPTATION_PERCENTILE, RMS_ADAPTATION_WINDOW_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Speech,
    NonSpeech,
    Noise,
}

impl Classification {
    /// Noise counts as non-speech for both `speech.begin` and `speech.end`
    /// purposes (§4.2 tie-break rule).
    pub fn is_speech_like(self) -> bool {
        matches!(self, Classification::Speech)
    }
}

pub trait VoiceClassifier: Send + Sync {
    fn classify(&mut self, frame: &[i16], frame_ms: u32) -> Classification;
}

/// Energy-gate + zero-crossing classifier with an adaptive RMS noise floor.
///
/// The floor tracks the `RMS_ADAPTATION_PERCENTILE` percentile of RMS values
/// observed on frames classified non-speech over the trailing
/// `RMS_ADAPTATION_WINDOW_MS`, so the gate follows slowly changing line
/// noise without needing a calibration step.
pub struct EnergyGateClassifier {
    elapsed_ms: u64,
    non_speech_samples: VecDeque<(u64, f32)>,
    floor: f32,
}

impl EnergyGateClassifier {
    pub fn new() -> Self {
        Self {
            elapsed_ms: 0,
            non_speech_samples: VecDeque::new(),
            floor: 50.0,
        }
    }

    fn rms(frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
        ((sum_sq / frame.len() as f64).sqrt()) as f32
    }

    fn zero_crossing_rate(frame: &[i16]) -> f32 {
        if frame.len() < 2 {
            return 0.0;
        }
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        crossings as f32 / (frame.len() - 1) as f32
    }

    fn update_floor(&mut self, rms: f32) {
        self.non_speech_samples.push_back((self.elapsed_ms, rms));
        let cutoff = self.elapsed_ms.saturating_sub(RMS_ADAPTATION_WINDOW_MS);
        while let Some(&(ts, _)) = self.non_speech_samples.front() {
            if ts < cutoff {
                self.non_speech_samples.pop_front();
            } else {
                break;
            }
        }
        if self.non_speech_samples.is_empty() {
            return;
        }
        let mut values: Vec<f32> = self.non_speech_samples.iter().map(|&(_, v)| v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((values.len() as f32 - 1.0) * RMS_ADAPTATION_PERCENTILE).round() as usize;
        self.floor = values[idx].max(20.0);
    }
}

impl Default for EnergyGateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceClassifier for EnergyGateClassifier {
    fn classify(&mut self, frame: &[i16], frame_ms: u32) -> Classification {
        self.elapsed_ms += frame_ms as u64;

        let rms = Self::rms(frame);
        let zcr = Self::zero_crossing_rate(frame);

        // Speech sits well above the noise floor with a moderate zero-crossing
        // rate; pure tonal or broadband noise sits near the floor or has an
        // implausible zero-crossing rate (either near-silent or near-pure-tone).
        let classification = if rms < self.floor * 1.5 {
            Classification::NonSpeech
        } else if (0.02..=0.35).contains(&zcr) {
            Classification::Speech
        } else {
            Classification::Noise
        };

        if classification != Classification::Speech {
            self.update_floor(rms);
        }

        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence_frame(len: usize) -> Vec<i16> {
        vec![0; len]
    }

    fn tone_frame(len: usize, amplitude: i16) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let phase = (i as f32) * 0.2;
                (phase.sin() * amplitude as f32) as i16
            })
            .collect()
    }

    #[test]
    fn silence_classifies_as_non_speech() {
        let mut c = EnergyGateClassifier::new();
        for _ in 0..20 {
            assert_eq!(c.classify(&silence_frame(320), 20), Classification::NonSpeech);
        }
    }

    #[test]
    fn loud_tone_classifies_as_speech_or_noise_never_panics() {
        let mut c = EnergyGateClassifier::new();
        // warm up the floor on silence first
        for _ in 0..10 {
            c.classify(&silence_frame(320), 20);
        }
        let result = c.classify(&tone_frame(320, 8000), 20);
        assert_ne!(result, Classification::NonSpeech);
    }

    #[test]
    fn floor_adapts_upward_with_louder_ambient_noise() {
        let mut c = EnergyGateClassifier::new();
        for _ in 0..200 {
            c.classify(&tone_frame(320, 200), 20);
        }
        assert!(c.floor > 50.0);
    }
}
