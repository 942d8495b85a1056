//! The Media Server driver (C5, §4.5): owns the telephony leg, pulls
//! capture frames at real-time pace, runs the voice activity detector on
//! them, streams them to the conversation server, and paces response audio
//! back into the call with barge-in flush priority over further playout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use asp_core::vad::{EnergyGateClassifier, VadConfig};
use asp_core::{
    AspError, AspResult, AudioFormat, AudioFrame, AudioParams, CallControl, CodecAdapter,
    ControlMessage, ListenMode, MediaChannel, PlayoutPacer, Transport, TransportMessage,
    VadParams, VoiceActivityDetector,
};

const INBOUND_STREAM_ID: u32 = 1;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn encoding_name(encoding: asp_core::Encoding) -> &'static str {
    match encoding {
        asp_core::Encoding::PcmS16le => "pcm_s16le",
        asp_core::Encoding::Mulaw => "mulaw",
        asp_core::Encoding::Alaw => "alaw",
    }
}

/// Tunables the driver negotiates at `session.start`; the rest of the
/// protocol's timers live server-side.
pub struct DriverConfig {
    pub server_url: String,
    pub telephony_format: AudioFormat,
    pub vad: VadConfig,
    pub system_prompt_ref: Option<String>,
}

/// Monotonic control-message sequence counter, shared across the send side
/// (the recv side never needs to originate a seq).
struct SeqCounter(AtomicU64);

impl SeqCounter {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Runs one call leg end to end: connects, negotiates a session, then
/// drives capture/VAD/send and recv/pace/playout until the transport closes
/// or `cancel` fires.
pub async fn run_driver<T: Transport>(
    mut transport: T,
    channel: Arc<dyn MediaChannel>,
    call_control: Arc<dyn CallControl>,
    config: DriverConfig,
    cancel: CancellationToken,
) -> AspResult<()> {
    let session_id = Uuid::new_v4().to_string();
    let seq = SeqCounter::new();

    match tokio::time::timeout(Duration::from_secs(5), transport.recv()).await {
        Ok(Ok(Some(TransportMessage::Control(ControlMessage::ProtocolCapabilities {
            ..
        })))) => {}
        Ok(Ok(other)) => {
            return Err(AspError::ProtocolViolation(format!(
                "expected protocol.capabilities, got {other:?}"
            )))
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(AspError::Timeout("protocol.capabilities not received".into())),
    }

    transport
        .send_control(ControlMessage::SessionStart {
            session_id: session_id.clone(),
            seq: seq.next(),
            ts_ms: now_ms(),
            audio: AudioParams {
                sample_rate: config.telephony_format.sample_rate,
                encoding: encoding_name(config.telephony_format.encoding).to_string(),
                frame_ms: config.telephony_format.frame_ms,
            },
            vad: VadParams {
                silence_hangover_ms: config.vad.silence_hangover_ms,
                min_speech_ms: config.vad.min_speech_ms,
                barge_in_min_ms: config.vad.barge_in_min_ms,
            },
            system_prompt_ref: config.system_prompt_ref.clone(),
        })
        .await?;

    match transport.recv().await? {
        Some(TransportMessage::Control(ControlMessage::SessionStarted { .. })) => {}
        Some(TransportMessage::Control(ControlMessage::SessionRejected { reason, .. })) => {
            return Err(AspError::Configuration(format!("session rejected: {reason}")));
        }
        other => {
            return Err(AspError::ProtocolViolation(format!(
                "expected session.started, got {other:?}"
            )))
        }
    }

    log::info!("[Driver] session {session_id} established on {}", config.server_url);

    let codec_adapter = CodecAdapter::new(config.telephony_format);
    let mut vad = VoiceActivityDetector::new(config.vad, EnergyGateClassifier::new());
    let pacer = Arc::new(PlayoutPacer::new(config.telephony_format));

    let pacer_task = {
        let pacer = Arc::clone(&pacer);
        let channel = Arc::clone(&channel);
        let cancel = cancel.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            pacer
                .run(&session_id, channel.as_ref(), &asp_core::NoopEventEmitter, cancel)
                .await;
        })
    };

    let mut mode = ListenMode::Listening;
    let mut current_response_id: Option<String> = None;
    let mut capture_seq: u32 = 0;
    let mut cadence = interval(Duration::from_millis(config.telephony_format.frame_ms as u64));

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            _ = cadence.tick() => {
                let capture = match channel.read_frame().await {
                    Ok(frame) => frame,
                    Err(e) => break Err(e),
                };

                let agent_pcm = codec_adapter.to_agent(&capture)?;
                let samples: Vec<i16> = agent_pcm
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();

                let timestamp_ms = capture_seq.wrapping_mul(config.telephony_format.frame_ms);
                let frame = AudioFrame::new(INBOUND_STREAM_ID, capture_seq, timestamp_ms, capture);
                capture_seq = capture_seq.wrapping_add(1);
                if let Err(e) = transport.send_audio(frame.encode()).await {
                    break Err(e);
                }

                match vad.process_frame(&samples, mode) {
                    Some(asp_core::VadSignal::SpeechEnd { .. }) if mode == ListenMode::Listening => {
                        if let Err(e) = transport.send_control(ControlMessage::AudioEnd {
                            session_id: session_id.clone(),
                            seq: seq.next(),
                            ts_ms: now_ms(),
                            stream_id: INBOUND_STREAM_ID,
                        }).await {
                            break Err(e);
                        }
                    }
                    Some(asp_core::VadSignal::BargeIn) => {
                        pacer.flush();
                        if let Some(response_id) = current_response_id.take() {
                            if let Err(e) = transport.send_control(ControlMessage::BargeIn {
                                session_id: session_id.clone(),
                                seq: seq.next(),
                                ts_ms: now_ms(),
                                response_id,
                            }).await {
                                break Err(e);
                            }
                        }
                        mode = ListenMode::Listening;
                    }
                    _ => {}
                }
            }

            msg = transport.recv() => {
                match msg {
                    Ok(Some(TransportMessage::Control(ControlMessage::ResponseStart { response_id, .. }))) => {
                        current_response_id = Some(response_id);
                        mode = ListenMode::Speaking;
                    }
                    Ok(Some(TransportMessage::Control(ControlMessage::ResponseEnd { .. })))
                    | Ok(Some(TransportMessage::Control(ControlMessage::ResponseCancelled { .. }))) => {
                        current_response_id = None;
                        mode = ListenMode::Listening;
                    }
                    Ok(Some(TransportMessage::Control(ControlMessage::Ping { .. }))) => {
                        if let Err(e) = transport.send_control(ControlMessage::Pong {
                            session_id: session_id.clone(),
                            seq: seq.next(),
                            ts_ms: now_ms(),
                        }).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(TransportMessage::Control(ControlMessage::SessionEnded { .. }))) => {
                        break Ok(());
                    }
                    Ok(Some(TransportMessage::Control(ControlMessage::Error { kind, message, .. }))) => {
                        log::warn!("[Driver] server error ({kind}): {message}");
                    }
                    Ok(Some(TransportMessage::Audio(bytes))) => {
                        match AudioFrame::decode(bytes) {
                            Ok(frame) => { pacer.enqueue(frame.payload); }
                            Err(e) => log::warn!("[Driver] dropping malformed audio frame: {e}"),
                        }
                    }
                    Ok(Some(TransportMessage::Control(other))) => {
                        log::debug!("[Driver] ignoring {}", other.type_name());
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
        }
    };

    pacer_task.abort();
    let _ = transport
        .send_control(ControlMessage::SessionEnd {
            session_id: session_id.clone(),
            seq: seq.next(),
            ts_ms: now_ms(),
        })
        .await;
    let _ = transport.close().await;
    let _ = call_control.hangup(channel.channel_id()).await;
    let _ = channel.close().await;

    outcome
}
