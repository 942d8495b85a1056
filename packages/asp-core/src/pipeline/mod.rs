//! Conversation pipeline (C6, §4.6): wires Transcribe -> Generate -> Synthesise
//! for one utterance, with sentence-chunked TTS forwarding, backpressure
//! pause/resume, and barge-in cancellation.
//!
//! The pipeline owns none of the transport or session-state plumbing; it is
//! handed a receiver of captured audio and a sender of synthesised audio by
//! the per-session supervisor (§5), and reports what happened through
//! [`ResponseOutcome`] plus [`EventEmitter`].

pub mod chunker;
pub mod context;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{AspError, AspResult};
use crate::events::{BackpressureEvent, EventEmitter, ResponseEvent};
use crate::protocol_constants::{
    BACKPRESSURE_TIMEOUT_MS, DEFAULT_HISTORY_MAX_TURNS, DEFAULT_MAX_CHUNK_CHARS,
    DEFAULT_STT_DEADLINE_MS, TX_HIGH_WATERMARK, TX_LOW_WATERMARK,
};
use crate::providers::{GenerationEvent, LanguageModel, SpeechToText, TextToSpeech, TranscriptEvent};

pub use chunker::SentenceChunker;
pub use context::ConversationContext;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What came of driving one utterance through the pipeline.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// The reply generated, synthesised, and streamed out completely.
    Completed { audio_bytes: u64 },
    /// A provider failed; a canned fallback utterance was spoken instead.
    Fallback { audio_bytes: u64 },
    /// Barge-in or a deadline cut the response short.
    Cancelled { reason: String },
}

/// Tunables controlling one pipeline's timing behaviour (§4.6, §5). Defaults
/// match the spec-mandated constants; a deployment may override per
/// [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub stt_deadline_ms: u64,
    pub max_chunk_chars: usize,
    pub history_max_turns: usize,
    pub tx_high_watermark: usize,
    pub tx_low_watermark: usize,
    pub backpressure_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stt_deadline_ms: DEFAULT_STT_DEADLINE_MS,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            history_max_turns: DEFAULT_HISTORY_MAX_TURNS,
            tx_high_watermark: TX_HIGH_WATERMARK,
            tx_low_watermark: TX_LOW_WATERMARK,
            backpressure_timeout_ms: BACKPRESSURE_TIMEOUT_MS,
        }
    }
}

const FALLBACK_UTTERANCE: &str = "Sorry, I'm having trouble responding right now. Could you try again?";

/// Ties the three provider capabilities together for one session.
pub struct ConversationPipeline {
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    config: PipelineConfig,
}

impl ConversationPipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        config: PipelineConfig,
    ) -> Self {
        Self { stt, llm, tts, config }
    }

    pub fn llm(&self) -> &Arc<dyn LanguageModel> {
        &self.llm
    }

    /// Transcribes captured audio, waiting at most `stt_deadline_ms` for a
    /// final transcript before falling back to the last partial (§4.6).
    async fn transcribe_utterance(
        &self,
        audio_in: mpsc::Receiver<Bytes>,
        language: Option<String>,
        cancel: CancellationToken,
    ) -> AspResult<String> {
        let mut events = self.stt.transcribe(audio_in, language, cancel.clone()).await?;
        let mut last_partial = String::new();
        let deadline = Duration::from_millis(self.config.stt_deadline_ms);

        let result = timeout(deadline, async {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    event = events.recv() => match event {
                        Some(TranscriptEvent::Partial(text)) => last_partial = text,
                        Some(TranscriptEvent::Final(text)) => return Some(text),
                        Some(TranscriptEvent::EndOfUtterance) | None => return Some(last_partial.clone()),
                    }
                }
            }
        })
        .await;

        match result {
            Ok(Some(transcript)) => Ok(transcript),
            Ok(None) => Err(AspError::TransportLoss("cancelled during transcription".into())),
            Err(_) => Ok(last_partial),
        }
    }

    /// Synthesises one text chunk and forwards its frames to `audio_out`,
    /// pausing when the outbound queue crosses `tx_high_watermark` and
    /// resuming once it drains back to `tx_low_watermark` (§4.5, §5). Returns
    /// the number of audio bytes forwarded.
    async fn synthesize_chunk(
        &self,
        session_id: &str,
        chunk: String,
        sample_rate: u32,
        audio_out: &mpsc::Sender<Bytes>,
        channel_capacity: usize,
        emitter: &dyn EventEmitter,
        cancel: &CancellationToken,
        first_frame_sent: &mut bool,
        started_at: std::time::Instant,
    ) -> AspResult<u64> {
        let mut frames = self.tts.synthesize(chunk, None, sample_rate, cancel.clone()).await?;
        let mut bytes_sent: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };

                    let queue_len = channel_capacity.saturating_sub(audio_out.capacity());
                    if queue_len >= self.config.tx_high_watermark {
                        emitter.emit_backpressure(BackpressureEvent::TxQueueHigh {
                            session_id: session_id.to_string(),
                            queue_len,
                            timestamp: now_ms(),
                        });
                        if !self
                            .wait_for_drain(audio_out, channel_capacity, cancel)
                            .await
                        {
                            return Err(AspError::Backpressure(format!(
                                "tx queue stayed above high watermark past {}ms",
                                self.config.backpressure_timeout_ms
                            )));
                        }
                        emitter.emit_backpressure(BackpressureEvent::TxQueueDrained {
                            session_id: session_id.to_string(),
                            timestamp: now_ms(),
                        });
                    }

                    bytes_sent += frame.len() as u64;
                    if audio_out.send(frame).await.is_err() {
                        return Err(AspError::TransportLoss("audio_out closed".into()));
                    }

                    if !*first_frame_sent {
                        *first_frame_sent = true;
                        emitter.emit_response(ResponseEvent::Streaming {
                            session_id: session_id.to_string(),
                            response_id: String::new(),
                            first_audio_latency_ms: started_at.elapsed().as_millis() as u64,
                            timestamp: now_ms(),
                        });
                    }
                }
            }
        }

        Ok(bytes_sent)
    }

    /// Waits for the outbound queue to drain to `tx_low_watermark`, giving up
    /// after `backpressure_timeout_ms`. Returns `false` on timeout or
    /// cancellation, either of which should abort the response.
    async fn wait_for_drain(
        &self,
        audio_out: &mpsc::Sender<Bytes>,
        channel_capacity: usize,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = Duration::from_millis(self.config.backpressure_timeout_ms);
        let low = self.config.tx_low_watermark;

        let wait = async {
            loop {
                let queue_len = channel_capacity.saturating_sub(audio_out.capacity());
                if queue_len <= low {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => false,
            ok = timeout(deadline, wait) => ok.unwrap_or(false),
        }
    }

    /// Drives one utterance through transcription, generation and synthesis.
    ///
    /// `audio_out`'s declared capacity must be passed as `channel_capacity`
    /// so the pipeline can compute queue depth from `Sender::capacity()`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_utterance(
        &self,
        session_id: &str,
        audio_in: mpsc::Receiver<Bytes>,
        language: Option<String>,
        sample_rate: u32,
        context: &mut ConversationContext,
        audio_out: mpsc::Sender<Bytes>,
        channel_capacity: usize,
        emitter: &dyn EventEmitter,
        cancel: CancellationToken,
    ) -> AspResult<ResponseOutcome> {
        let started_at = std::time::Instant::now();

        if cancel.is_cancelled() {
            return Ok(ResponseOutcome::Cancelled { reason: "barge_in".into() });
        }

        let transcript = self.transcribe_utterance(audio_in, language, cancel.clone()).await?;
        if transcript.trim().is_empty() {
            return Err(AspError::EmptyUtterance(
                "audio.end closed an utterance with no recognised speech".into(),
            ));
        }

        context.push_user_turn(&transcript);
        context.maybe_summarize(self.llm.as_ref()).await;

        emitter.emit_response(ResponseEvent::Generating {
            session_id: session_id.to_string(),
            response_id: String::new(),
            utterance_id: String::new(),
            timestamp: now_ms(),
        });

        let messages = context.messages_for_generation();
        let generation = self.llm.generate(messages, cancel.clone()).await;

        let generation = match generation {
            Ok(rx) => rx,
            Err(AspError::ProviderUnavailable(reason)) => {
                log::warn!("[Pipeline] language model unavailable: {reason}");
                let mut first_frame_sent = false;
                let bytes_sent = self
                    .synthesize_chunk(
                        session_id,
                        FALLBACK_UTTERANCE.to_string(),
                        sample_rate,
                        &audio_out,
                        channel_capacity,
                        emitter,
                        &cancel,
                        &mut first_frame_sent,
                        started_at,
                    )
                    .await?;
                context.push_assistant_turn(FALLBACK_UTTERANCE, false);
                return Ok(ResponseOutcome::Fallback { audio_bytes: bytes_sent });
            }
            Err(err) => return Err(err),
        };

        self.stream_generation(
            session_id,
            generation,
            sample_rate,
            context,
            &audio_out,
            channel_capacity,
            emitter,
            cancel,
            started_at,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_generation(
        &self,
        session_id: &str,
        mut generation: mpsc::Receiver<GenerationEvent>,
        sample_rate: u32,
        context: &mut ConversationContext,
        audio_out: &mpsc::Sender<Bytes>,
        channel_capacity: usize,
        emitter: &dyn EventEmitter,
        cancel: CancellationToken,
        started_at: std::time::Instant,
    ) -> AspResult<ResponseOutcome> {
        let mut chunker = SentenceChunker::new(self.config.max_chunk_chars);
        let mut full_reply = String::new();
        let mut bytes_sent: u64 = 0;
        let mut first_frame_sent = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    context.push_assistant_turn(&full_reply, true);
                    return Ok(ResponseOutcome::Cancelled { reason: "barge_in".into() });
                }
                event = generation.recv() => {
                    let Some(event) = event else {
                        break;
                    };

                    match event {
                        GenerationEvent::Text(text) => {
                            full_reply.push_str(&text);
                            for chunk in chunker.push(&text) {
                                bytes_sent += self
                                    .synthesize_chunk(
                                        session_id,
                                        chunk,
                                        sample_rate,
                                        audio_out,
                                        channel_capacity,
                                        emitter,
                                        &cancel,
                                        &mut first_frame_sent,
                                        started_at,
                                    )
                                    .await?;
                            }
                        }
                        // Tool calls resolve at chunk boundaries only: finish
                        // speaking whatever has already been chunked before
                        // acknowledging the call, rather than interrupting
                        // synthesis mid-sentence.
                        GenerationEvent::ToolCall { name, .. } => {
                            if let Some(chunk) = chunker.flush() {
                                bytes_sent += self
                                    .synthesize_chunk(
                                        session_id,
                                        chunk,
                                        sample_rate,
                                        audio_out,
                                        channel_capacity,
                                        emitter,
                                        &cancel,
                                        &mut first_frame_sent,
                                        started_at,
                                    )
                                    .await?;
                            }
                            log::info!("[Pipeline] tool call requested: {name}");
                        }
                        GenerationEvent::End => break,
                    }
                }
            }
        }

        if let Some(chunk) = chunker.flush() {
            bytes_sent += self
                .synthesize_chunk(
                    session_id,
                    chunk,
                    sample_rate,
                    audio_out,
                    channel_capacity,
                    emitter,
                    &cancel,
                    &mut first_frame_sent,
                    started_at,
                )
                .await?;
        }

        context.push_assistant_turn(&full_reply, false);
        emitter.emit_response(ResponseEvent::Done {
            session_id: session_id.to_string(),
            response_id: String::new(),
            audio_bytes: bytes_sent,
            timestamp: now_ms(),
        });

        Ok(ResponseOutcome::Completed { audio_bytes: bytes_sent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::providers::reference::{EchoSpeechToText, ScriptedLanguageModel, ToneTextToSpeech};
    use crate::providers::Message;
    use async_trait::async_trait;

    fn pipeline() -> ConversationPipeline {
        ConversationPipeline::new(
            Arc::new(EchoSpeechToText),
            Arc::new(ScriptedLanguageModel::new()),
            Arc::new(ToneTextToSpeech::new()),
            PipelineConfig::default(),
        )
    }

    async fn feed_audio() -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(&[0; 320])).await.unwrap();
        drop(tx);
        rx
    }

    #[tokio::test]
    async fn completes_and_streams_audio_for_a_normal_utterance() {
        let pipeline = pipeline();
        let mut context = ConversationContext::new(20);
        let (audio_tx, mut audio_rx) = mpsc::channel(32);
        let emitter = NoopEventEmitter;

        let outcome = pipeline
            .run_utterance(
                "S1",
                feed_audio().await,
                None,
                16_000,
                &mut context,
                audio_tx,
                32,
                &emitter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Completed { audio_bytes } if audio_bytes > 0));
        assert!(audio_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn empty_utterance_is_rejected_before_invoking_the_llm() {
        struct PanicsIfCalled;
        #[async_trait]
        impl LanguageModel for PanicsIfCalled {
            async fn generate(
                &self,
                _messages: Vec<Message>,
                _cancel: CancellationToken,
            ) -> AspResult<mpsc::Receiver<GenerationEvent>> {
                panic!("LLM must not be invoked for an empty utterance");
            }
            async fn summarize(&self, _messages: Vec<Message>) -> AspResult<String> {
                panic!("LLM must not be invoked for an empty utterance");
            }
        }

        struct SilentStt;
        #[async_trait]
        impl SpeechToText for SilentStt {
            async fn transcribe(
                &self,
                _audio: mpsc::Receiver<Bytes>,
                _language: Option<String>,
                _cancel: CancellationToken,
            ) -> AspResult<mpsc::Receiver<TranscriptEvent>> {
                let (tx, rx) = mpsc::channel(1);
                tx.send(TranscriptEvent::EndOfUtterance).await.unwrap();
                Ok(rx)
            }
        }

        let pipeline = ConversationPipeline::new(
            Arc::new(SilentStt),
            Arc::new(PanicsIfCalled),
            Arc::new(ToneTextToSpeech::new()),
            PipelineConfig::default(),
        );
        let mut context = ConversationContext::new(20);
        let (audio_tx, _audio_rx) = mpsc::channel(32);
        let emitter = NoopEventEmitter;
        let (silent_tx, silent_rx) = mpsc::channel(1);
        drop(silent_tx);

        let err = pipeline
            .run_utterance(
                "S1",
                silent_rx,
                None,
                16_000,
                &mut context,
                audio_tx,
                32,
                &emitter,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AspError::EmptyUtterance(_)));
    }

    #[tokio::test]
    async fn provider_unavailable_falls_back_to_a_canned_utterance() {
        let pipeline = ConversationPipeline::new(
            Arc::new(EchoSpeechToText),
            Arc::new(ScriptedLanguageModel::simulating_unavailable()),
            Arc::new(ToneTextToSpeech::new()),
            PipelineConfig::default(),
        );
        let mut context = ConversationContext::new(20);
        let (audio_tx, mut audio_rx) = mpsc::channel(32);
        let emitter = NoopEventEmitter;

        let outcome = pipeline
            .run_utterance(
                "S1",
                feed_audio().await,
                None,
                16_000,
                &mut context,
                audio_tx,
                32,
                &emitter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Fallback { .. }));
        assert!(audio_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn barge_in_cancellation_stops_the_response_promptly() {
        let pipeline = pipeline();
        let mut context = ConversationContext::new(20);
        let (audio_tx, _audio_rx) = mpsc::channel(32);
        let emitter = NoopEventEmitter;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pipeline
            .run_utterance(
                "S1",
                feed_audio().await,
                None,
                16_000,
                &mut context,
                audio_tx,
                32,
                &emitter,
                cancel,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Cancelled { .. }));
    }
}
