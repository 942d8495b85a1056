//! Provider adapters (C7, §4.7): three narrow async capabilities standing in
//! for the external STT/LLM/TTS services the spec treats as out of scope.
//! Concrete variants live in [`reference`]; production deployments supply
//! their own.

pub mod reference;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AspResult;

/// One role-tagged conversation turn (§4.6 conversation context).
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    Partial(String),
    Final(String),
    EndOfUtterance,
}

#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Text(String),
    ToolCall { name: String, args: serde_json::Value },
    End,
}

/// `transcribe(pcm16_mono_16khz_stream, language?) → text_stream` (§4.7).
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        audio: mpsc::Receiver<Bytes>,
        language: Option<String>,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<TranscriptEvent>>;
}

/// `generate(messages, tools?) → token_stream` plus synchronous `summarize`
/// used for context compression (§4.6, §4.7).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<GenerationEvent>>;

    async fn summarize(&self, messages: Vec<Message>) -> AspResult<String>;
}

/// `synthesize(text_chunk, voice, sample_rate) → frame_stream` (§4.7).
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text_chunk: String,
        voice: Option<String>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> AspResult<mpsc::Receiver<Bytes>>;

    /// Pre-rendered comfort/filler audio, if this provider offers any.
    fn preamble_frames(&self) -> Option<Vec<Bytes>> {
        None
    }
}
