//! Voice Activity Detector (C2, §4.2).
//!
//! Drives `speech.begin` / `speech.end` / `barge_in` off a stream of 20ms
//! frames and the session's current mode, polymorphic over a
//! [`VoiceClassifier`].

mod classifier;

pub use classifier::{Classification, EnergyGateClassifier, VoiceClassifier};

use crate::protocol_constants::{
    DEFAULT_BARGE_IN_MIN_MS, DEFAULT_MIN_SPEECH_MS, DEFAULT_SILENCE_HANGOVER_MS,
};

/// Whether the session is currently listening to the caller or speaking a
/// response; barge-in can only fire while `Speaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Listening,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    SpeechBegin,
    SpeechEnd { frame_count: u64 },
    BargeIn,
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub min_speech_ms: u32,
    pub silence_hangover_ms: u32,
    pub barge_in_min_ms: u32,
    pub frame_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_speech_ms: DEFAULT_MIN_SPEECH_MS,
            silence_hangover_ms: DEFAULT_SILENCE_HANGOVER_MS,
            barge_in_min_ms: DEFAULT_BARGE_IN_MIN_MS,
            frame_ms: crate::protocol_constants::DEFAULT_FRAME_MS,
        }
    }
}

/// Hangover-timer state machine driving VAD events off a classifier.
pub struct VoiceActivityDetector<C: VoiceClassifier> {
    config: VadConfig,
    classifier: C,
    speech_run_ms: u32,
    silence_run_ms: u32,
    in_utterance: bool,
    barge_in_armed: bool,
    frame_count: u64,
}

impl<C: VoiceClassifier> VoiceActivityDetector<C> {
    pub fn new(config: VadConfig, classifier: C) -> Self {
        Self {
            config,
            classifier,
            speech_run_ms: 0,
            silence_run_ms: 0,
            in_utterance: false,
            barge_in_armed: true,
            frame_count: 0,
        }
    }

    pub fn in_utterance(&self) -> bool {
        self.in_utterance
    }

    /// Processes one frame, returning any VAD signals it produced. A single
    /// frame may emit at most one signal, except that `barge_in` and
    /// `speech.begin` are mutually exclusive by construction (barge-in only
    /// evaluates while `Speaking`, `speech.begin` only while `Listening`).
    pub fn process_frame(&mut self, frame: &[i16], mode: ListenMode) -> Option<VadSignal> {
        let classification = self.classifier.classify(frame, self.config.frame_ms);
        let is_speech = classification.is_speech_like();

        if is_speech {
            self.silence_run_ms = 0;
            self.speech_run_ms += self.config.frame_ms;
            self.frame_count += 1;

            if mode == ListenMode::Speaking
                && self.barge_in_armed
                && self.speech_run_ms >= self.config.barge_in_min_ms
            {
                self.barge_in_armed = false;
                return Some(VadSignal::BargeIn);
            }

            if mode == ListenMode::Listening
                && !self.in_utterance
                && self.speech_run_ms >= self.config.min_speech_ms
            {
                self.in_utterance = true;
                return Some(VadSignal::SpeechBegin);
            }
        } else {
            self.speech_run_ms = 0;
            self.barge_in_armed = true;

            if self.in_utterance {
                self.silence_run_ms += self.config.frame_ms;
                if self.silence_run_ms >= self.config.silence_hangover_ms {
                    self.in_utterance = false;
                    let frame_count = self.frame_count;
                    self.frame_count = 0;
                    self.silence_run_ms = 0;
                    return Some(VadSignal::SpeechEnd { frame_count });
                }
            }
        }

        None
    }
}
