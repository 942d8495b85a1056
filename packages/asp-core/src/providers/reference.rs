//! Reference provider adapters (§10.6): deterministic, dependency-free
//! stand-ins so the crate runs end-to-end without external STT/LLM/TTS
//! services. Not production providers — see `DESIGN.md`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{GenerationEvent, LanguageModel, Message, Role, SpeechToText, TextToSpeech, TranscriptEvent};
use crate::error::{AspError, AspResult};

const PHRASES: &[&str] = &[
    "I didn't catch that, could you repeat it?",
    "Sure, I can help with that.",
    "Let me look into that for you.",
    "Got it, one moment please.",
];

/// "Transcribes" by mapping the utterance's frame count onto a fixed phrase
/// table — deterministic, no model dependency.
pub struct EchoSpeechToText;

#[async_trait]
impl SpeechToText for EchoSpeechToText {
    async fn transcribe(
        &self,
        mut audio: mpsc::Receiver<Bytes>,
        _language: Option<String>,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<TranscriptEvent>> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let mut frame_count: usize = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    frame = audio.recv() => match frame {
                        Some(_) => frame_count += 1,
                        None => break,
                    }
                }
            }

            let phrase = PHRASES[frame_count % PHRASES.len()];
            let _ = tx.send(TranscriptEvent::Partial(phrase.to_string())).await;
            let _ = tx.send(TranscriptEvent::Final(phrase.to_string())).await;
            let _ = tx.send(TranscriptEvent::EndOfUtterance).await;
        });
        Ok(rx)
    }
}

/// Streams a canned or templated reply character-by-character. Can be
/// configured to simulate `Unavailable` for the provider-failure scenario
/// (§8 scenario 3).
pub struct ScriptedLanguageModel {
    simulate_unavailable: bool,
}

impl ScriptedLanguageModel {
    pub fn new() -> Self {
        Self {
            simulate_unavailable: false,
        }
    }

    pub fn simulating_unavailable() -> Self {
        Self {
            simulate_unavailable: true,
        }
    }

    fn reply_for(transcript: &str) -> String {
        format!("You said: {transcript}. Here is a response to that.")
    }
}

impl Default for ScriptedLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn generate(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<GenerationEvent>> {
        if self.simulate_unavailable {
            return Err(AspError::ProviderUnavailable("scripted LLM is offline".into()));
        }

        let transcript = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let reply = Self::reply_for(&transcript);
            for ch in reply.chars() {
                if cancel.is_cancelled() {
                    return;
                }
                if tx.send(GenerationEvent::Text(ch.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(GenerationEvent::End).await;
        });
        Ok(rx)
    }

    async fn summarize(&self, messages: Vec<Message>) -> AspResult<String> {
        let turns = messages.len();
        Ok(format!("[summary of {turns} earlier turns]"))
    }
}

/// Synthesises a fixed tone (or silence) waveform framed at 20ms, streaming
/// frames as they're generated and honouring cancellation promptly.
pub struct ToneTextToSpeech {
    amplitude: i16,
    frame_ms: u32,
}

impl ToneTextToSpeech {
    pub fn new() -> Self {
        Self {
            amplitude: 4000,
            frame_ms: crate::protocol_constants::DEFAULT_FRAME_MS,
        }
    }
}

impl Default for ToneTextToSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for ToneTextToSpeech {
    async fn synthesize(
        &self,
        text_chunk: String,
        _voice: Option<String>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<Bytes>> {
        // One 20ms frame per 3 characters of the chunk, a deterministic
        // stand-in for "time to speak this text".
        let frame_count = (text_chunk.len() / 3).max(1);
        let samples_per_frame = ((sample_rate as u64 * self.frame_ms as u64) / 1000) as usize;
        let amplitude = self.amplitude;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for i in 0..frame_count {
                if cancel.is_cancelled() {
                    return;
                }
                let mut buf = Vec::with_capacity(samples_per_frame * 2);
                for s in 0..samples_per_frame {
                    let phase = ((i * samples_per_frame + s) as f32) * 0.2;
                    let sample = (phase.sin() * amplitude as f32) as i16;
                    buf.extend_from_slice(&sample.to_le_bytes());
                }
                if tx.send(Bytes::from(buf)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_stt_emits_final_and_end_of_utterance() {
        let (audio_tx, audio_rx) = mpsc::channel(4);
        audio_tx.send(Bytes::from_static(&[0; 10])).await.unwrap();
        drop(audio_tx);

        let stt = EchoSpeechToText;
        let mut events = stt
            .transcribe(audio_rx, None, CancellationToken::new())
            .await
            .unwrap();

        let mut saw_final = false;
        let mut saw_end = false;
        while let Some(event) = events.recv().await {
            match event {
                TranscriptEvent::Final(_) => saw_final = true,
                TranscriptEvent::EndOfUtterance => saw_end = true,
                _ => {}
            }
        }
        assert!(saw_final && saw_end);
    }

    #[tokio::test]
    async fn scripted_llm_streams_text_then_end() {
        let llm = ScriptedLanguageModel::new();
        let messages = vec![Message {
            role: Role::User,
            content: "hello".into(),
        }];
        let mut events = llm.generate(messages, CancellationToken::new()).await.unwrap();

        let mut saw_text = false;
        let mut saw_end = false;
        while let Some(event) = events.recv().await {
            match event {
                GenerationEvent::Text(_) => saw_text = true,
                GenerationEvent::End => saw_end = true,
                _ => {}
            }
        }
        assert!(saw_text && saw_end);
    }

    #[tokio::test]
    async fn scripted_llm_can_simulate_unavailable() {
        let llm = ScriptedLanguageModel::simulating_unavailable();
        let err = llm.generate(vec![], CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AspError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn tone_tts_streams_frames_of_expected_size() {
        let tts = ToneTextToSpeech::new();
        let mut frames = tts
            .synthesize("hello there".into(), None, 16_000, CancellationToken::new())
            .await
            .unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.len(), 320 * 2); // 16kHz, 20ms, 16-bit
    }

    #[tokio::test]
    async fn tone_tts_stops_promptly_on_cancellation() {
        let tts = ToneTextToSpeech::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut frames = tts
            .synthesize("a very long chunk of text indeed".into(), None, 16_000, cancel)
            .await
            .unwrap();
        assert!(frames.recv().await.is_none());
    }
}
