//! The conversation server's only real transport: one axum WebSocket
//! connection per Session, speaking the ASP control/audio vocabulary (§4.3,
//! §6) and driving the [`Session`] state machine and [`ConversationPipeline`]
//! for its lifetime.
//!
//! One supervisor task per connection owns the `Session` and the negotiated
//! [`CodecAdapter`] outright; nothing else mutates them. At most one response
//! is in flight at a time, tracked as a [`PendingResponse`] so an incoming
//! `barge_in` can cancel it without waiting for the pipeline task to notice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::AppState;
use crate::audio::{AudioFormat, CodecAdapter, Encoding};
use crate::error::AspError;
use crate::events::{EventEmitter, SessionEvent, VadEvent};
use crate::pipeline::{ConversationContext, ResponseOutcome};
use crate::protocol::{AudioFrame, AudioParams, ControlMessage};
use crate::protocol_constants::*;
use crate::session::{Session, SessionState};

const INBOUND_CHANNEL_CAPACITY: usize = 64;
const AUDIO_OUT_CHANNEL_CAPACITY: usize = 32;
const HOUSEKEEPING_INTERVAL_MS: u64 = 1_000;
const OUTBOUND_STREAM_ID: u32 = 1;

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn parse_encoding(raw: &str) -> Option<Encoding> {
    match raw {
        "pcm_s16le" => Some(Encoding::PcmS16le),
        "mulaw" => Some(Encoding::Mulaw),
        "alaw" => Some(Encoding::Alaw),
        _ => None,
    }
}

fn encoding_name(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::PcmS16le => "pcm_s16le",
        Encoding::Mulaw => "mulaw",
        Encoding::Alaw => "alaw",
    }
}

/// Upgrade entrypoint; the rest of the connection's lifetime lives in
/// [`handle_ws`].
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// One in-flight response, tracked so `barge_in` can cut it off without
/// waiting for the spawned pipeline task to unwind on its own.
struct PendingResponse {
    response_id: String,
    cancel: CancellationToken,
    audio_rx: mpsc::Receiver<Bytes>,
    join: tokio::task::JoinHandle<crate::error::AspResult<ResponseOutcome>>,
    first_frame_sent: bool,
}

fn spawn_response(
    state: &AppState,
    context: &Arc<Mutex<ConversationContext>>,
    session_id: &str,
    agent_sample_rate: u32,
    audio_in: mpsc::Receiver<Bytes>,
) -> PendingResponse {
    let response_id = Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let child_cancel = cancel.clone();
    let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_OUT_CHANNEL_CAPACITY);

    let pipeline = Arc::clone(&state.pipeline);
    let context = Arc::clone(context);
    let emitter: Arc<dyn EventEmitter> = Arc::clone(&state.event_bridge) as Arc<dyn EventEmitter>;
    let sid = session_id.to_string();

    let join = tokio::spawn(async move {
        let mut guard = context.lock().await;
        pipeline
            .run_utterance(
                &sid,
                audio_in,
                None,
                agent_sample_rate,
                &mut guard,
                audio_tx,
                AUDIO_OUT_CHANNEL_CAPACITY,
                emitter.as_ref(),
                child_cancel,
            )
            .await
    });

    PendingResponse {
        response_id,
        cancel,
        audio_rx,
        join,
        first_frame_sent: false,
    }
}

/// Signals cooperative cancellation and lets the response task run to
/// completion off to the side instead of `abort()`ing it. `run_utterance`'s
/// own `cancel.cancelled()` branch (pipeline/mod.rs) is what pushes the
/// `[interrupted]` annotation into the conversation context and performs the
/// ordered TTS/LLM cancellation; aborting the handle unconditionally drops
/// the task before it's ever polled again and skips all of that. Keeping
/// `audio_rx` alive in the reaper avoids the task's own `audio_out.send`
/// erroring out before it reaches that branch.
fn cancel_and_reap(p: PendingResponse) {
    p.cancel.cancel();
    let PendingResponse { join, audio_rx, .. } = p;
    tokio::spawn(async move {
        let _audio_rx = audio_rx;
        if let Err(e) = join.await {
            log::warn!("[WS] cancelled response task did not finish cleanly: {e}");
        }
    });
}

async fn send_control(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: ControlMessage,
) -> bool {
    match serde_json::to_string(&msg) {
        Ok(text) => ws_tx.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            log::error!("[WS] failed to encode control message: {e}");
            false
        }
    }
}

/// Waits up to `starting_timeout_ms` for a well-formed `session.start`,
/// discarding stray WebSocket ping/pong frames along the way.
async fn await_session_start(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    starting_timeout_ms: u64,
) -> Option<ControlMessage> {
    let wait = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return serde_json::from_str::<ControlMessage>(&text)
                        .ok()
                        .filter(|m| matches!(m, ControlMessage::SessionStart { .. }));
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                _ => return None,
            }
        }
        None
    };

    timeout(Duration::from_millis(starting_timeout_ms), wait).await.ok().flatten()
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let conn_guard = state.ws_manager.register();
    let session_id = conn_guard.id().to_string();
    let cancel_token = conn_guard.cancel_token().clone();
    let mut out_seq: u64 = 0;

    let capabilities = ControlMessage::ProtocolCapabilities {
        session_id: session_id.clone(),
        seq: out_seq,
        ts_ms: now_ms(),
        sample_rates: vec![8_000, 16_000],
        encodings: vec!["pcm_s16le".into(), "mulaw".into(), "alaw".into()],
        features: vec!["barge_in".into(), "streaming_tts".into()],
    };
    if !send_control(&mut ws_tx, capabilities).await {
        return;
    }

    let Some(ControlMessage::SessionStart { audio, vad, .. }) =
        await_session_start(&mut ws_rx, state.starting_timeout_ms).await
    else {
        out_seq += 1;
        let _ = send_control(
            &mut ws_tx,
            ControlMessage::Error {
                session_id: session_id.clone(),
                seq: out_seq,
                ts_ms: now_ms(),
                kind: "timeout".into(),
                message: "no valid session.start within starting_timeout".into(),
            },
        )
        .await;
        return;
    };

    let Some(encoding) = parse_encoding(&audio.encoding) else {
        out_seq += 1;
        let _ = send_control(
            &mut ws_tx,
            ControlMessage::SessionRejected {
                session_id: session_id.clone(),
                seq: out_seq,
                ts_ms: now_ms(),
                reason: format!("unsupported encoding: {}", audio.encoding),
            },
        )
        .await;
        return;
    };
    if audio.sample_rate == 0 || audio.frame_ms == 0 {
        out_seq += 1;
        let _ = send_control(
            &mut ws_tx,
            ControlMessage::SessionRejected {
                session_id: session_id.clone(),
                seq: out_seq,
                ts_ms: now_ms(),
                reason: "sample_rate and frame_ms must both be >= 1".into(),
            },
        )
        .await;
        return;
    }
    if encoding != Encoding::PcmS16le && audio.sample_rate != 8_000 {
        out_seq += 1;
        let _ = send_control(
            &mut ws_tx,
            ControlMessage::SessionRejected {
                session_id: session_id.clone(),
                seq: out_seq,
                ts_ms: now_ms(),
                reason: format!(
                    "{} is only supported at 8000 Hz, got {}",
                    audio.encoding, audio.sample_rate
                ),
            },
        )
        .await;
        return;
    }

    conn_guard.set_negotiated_format(encoding_name(encoding), audio.sample_rate);

    let telephony_format = AudioFormat::new(audio.sample_rate, encoding, audio.frame_ms);
    let codec_adapter = CodecAdapter::new(telephony_format);
    let agent_format = codec_adapter.agent_format();
    let vad_config = crate::vad::VadConfig {
        min_speech_ms: vad.min_speech_ms,
        silence_hangover_ms: vad.silence_hangover_ms,
        barge_in_min_ms: vad.barge_in_min_ms,
        frame_ms: telephony_format.frame_ms,
    };

    let mut session = Session::new(session_id.clone(), telephony_format, vad_config, now_ms());
    if session.transition(SessionState::Capabilities).is_err()
        || session.transition(SessionState::Starting).is_err()
        || session.transition(SessionState::ActiveListening).is_err()
    {
        log::error!("[WS] session {session_id} could not reach Listening, closing");
        return;
    }

    out_seq += 1;
    let started_ok = send_control(
        &mut ws_tx,
        ControlMessage::SessionStarted {
            session_id: session_id.clone(),
            seq: out_seq,
            ts_ms: now_ms(),
            audio: AudioParams {
                sample_rate: telephony_format.sample_rate,
                encoding: encoding_name(encoding).to_string(),
                frame_ms: telephony_format.frame_ms,
            },
        },
    )
    .await;
    if !started_ok {
        return;
    }

    state.event_bridge.emit_session(SessionEvent::Started {
        session_id: session_id.clone(),
        timestamp: now_ms(),
    });

    let context = Arc::new(Mutex::new(ConversationContext::new(DEFAULT_HISTORY_MAX_TURNS)));
    let (mut inbound_tx, mut inbound_rx) = mpsc::channel::<Bytes>(INBOUND_CHANNEL_CAPACITY);
    let mut pending: Option<PendingResponse> = None;
    let mut response_spawned_at: Option<Instant> = None;
    let mut utterance_open_since = Instant::now();
    let mut out_stream_seq: u32 = 0;
    let mut last_activity = Instant::now();

    let mut housekeeping = interval(Duration::from_millis(HOUSEKEEPING_INTERVAL_MS));
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ping_interval = interval(Duration::from_millis(PING_INTERVAL_MS));
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping_interval.tick().await;

    'session: loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] session {session_id} force-closed");
                break 'session;
            }

            _ = ping_interval.tick() => {
                out_seq += 1;
                if !send_control(&mut ws_tx, ControlMessage::Ping {
                    session_id: session_id.clone(),
                    seq: out_seq,
                    ts_ms: now_ms(),
                }).await {
                    break 'session;
                }
            }

            _ = housekeeping.tick() => {
                if last_activity.elapsed() > Duration::from_millis(IDLE_TIMEOUT_MS) {
                    log::info!("[WS] session {session_id} idle timeout");
                    break 'session;
                }

                let timed_out = matches!(
                    (&pending, response_spawned_at),
                    (Some(p), Some(spawned_at))
                        if !p.first_frame_sent
                            && spawned_at.elapsed() > Duration::from_millis(PROCESSING_TIMEOUT_MS)
                );
                if timed_out {
                    if let Some(p) = pending.take() {
                        let response_id = p.response_id.clone();
                        cancel_and_reap(p);
                        response_spawned_at = None;
                        out_seq += 1;
                        let _ = send_control(&mut ws_tx, ControlMessage::Error {
                            session_id: session_id.clone(),
                            seq: out_seq,
                            ts_ms: now_ms(),
                            kind: "timeout".into(),
                            message: format!(
                                "response {response_id} produced no audio within processing_timeout"
                            ),
                        }).await;
                        let _ = session.end_response();
                    }
                }

                if session.state() == SessionState::ActiveListening
                    && utterance_open_since.elapsed() > Duration::from_millis(MAX_UTTERANCE_MS)
                {
                    log::info!("[WS] session {session_id} utterance exceeded max_utterance_ms, forcing audio.end");
                    dispatch_utterance(
                        &state,
                        &context,
                        &mut session,
                        &session_id,
                        agent_format.sample_rate,
                        &mut inbound_tx,
                        &mut inbound_rx,
                        &mut pending,
                        &mut response_spawned_at,
                        &mut utterance_open_since,
                    );
                }
            }

            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ControlMessage>(&text) {
                            Ok(ControlMessage::AudioEnd { .. }) => {
                                if session.state() == SessionState::ActiveListening {
                                    dispatch_utterance(
                                        &state,
                                        &context,
                                        &mut session,
                                        &session_id,
                                        agent_format.sample_rate,
                                        &mut inbound_tx,
                                        &mut inbound_rx,
                                        &mut pending,
                                        &mut response_spawned_at,
                                        &mut utterance_open_since,
                                    );
                                } else {
                                    log::debug!("[WS] session {session_id} ignoring audio.end outside Listening");
                                }
                            }

                            Ok(ControlMessage::BargeIn { response_id, .. }) => {
                                if pending.is_none() {
                                    log::debug!("[WS] session {session_id} barge_in with no in-flight response, ignoring");
                                } else if session.state() != SessionState::ActiveSpeaking {
                                    // `Session::barge_in` only has a legal transition out of
                                    // `ActiveSpeaking`; a response that's been spawned but
                                    // hasn't produced its first frame yet is still
                                    // `ActiveProcessing`, and cancelling it out from under
                                    // the session here would stall it with nothing left to
                                    // recover it (the processing_timeout safety net requires
                                    // `pending` to be `Some`). Treat it as a protocol
                                    // violation instead of silently stranding the session.
                                    log::warn!(
                                        "[WS] session {session_id} barge_in for response {response_id} arrived in state {:?}, not ActiveSpeaking",
                                        session.state()
                                    );
                                    out_seq += 1;
                                    let _ = send_control(&mut ws_tx, ControlMessage::Error {
                                        session_id: session_id.clone(),
                                        seq: out_seq,
                                        ts_ms: now_ms(),
                                        kind: "protocol_violation".into(),
                                        message: format!(
                                            "barge_in for response {response_id} arrived before it started speaking"
                                        ),
                                    }).await;
                                    break 'session;
                                } else {
                                    let old = pending.take().unwrap();
                                    let old_response_id = old.response_id.clone();
                                    cancel_and_reap(old);
                                    response_spawned_at = None;

                                    let new_utterance_id = Uuid::new_v4().to_string();
                                    if let Err(e) = session.barge_in(new_utterance_id) {
                                        log::error!("[WS] session {session_id} barge_in transition failed unexpectedly: {e}");
                                        out_seq += 1;
                                        let _ = send_control(&mut ws_tx, ControlMessage::Error {
                                            session_id: session_id.clone(),
                                            seq: out_seq,
                                            ts_ms: now_ms(),
                                            kind: "protocol_violation".into(),
                                            message: e.to_string(),
                                        }).await;
                                        break 'session;
                                    }

                                    out_seq += 1;
                                    let _ = send_control(&mut ws_tx, ControlMessage::ResponseCancelled {
                                        session_id: session_id.clone(),
                                        seq: out_seq,
                                        ts_ms: now_ms(),
                                        response_id,
                                    }).await;
                                    state.event_bridge.emit_vad(VadEvent::BargeIn {
                                        session_id: session_id.clone(),
                                        cancelled_response_id: old_response_id,
                                        timestamp: now_ms(),
                                    });

                                    let (new_tx, new_rx) = mpsc::channel::<Bytes>(INBOUND_CHANNEL_CAPACITY);
                                    let closed_tx = std::mem::replace(&mut inbound_tx, new_tx);
                                    drop(closed_tx);
                                    let closed_rx = std::mem::replace(&mut inbound_rx, new_rx);
                                    utterance_open_since = Instant::now();

                                    let p = spawn_response(&state, &context, &session_id, agent_format.sample_rate, closed_rx);
                                    pending = Some(p);
                                    response_spawned_at = Some(Instant::now());
                                }
                            }

                            Ok(ControlMessage::Ping { .. }) => {
                                out_seq += 1;
                                let _ = send_control(&mut ws_tx, ControlMessage::Pong {
                                    session_id: session_id.clone(),
                                    seq: out_seq,
                                    ts_ms: now_ms(),
                                }).await;
                            }

                            Ok(ControlMessage::Pong { .. }) => {}

                            Ok(ControlMessage::SessionEnd { .. }) => {
                                if let Some(p) = pending.take() {
                                    cancel_and_reap(p);
                                }
                                let _ = session.begin_ending();
                                session.close();
                                out_seq += 1;
                                let summary = session.summary();
                                let _ = send_control(&mut ws_tx, ControlMessage::SessionEnded {
                                    session_id: session_id.clone(),
                                    seq: out_seq,
                                    ts_ms: now_ms(),
                                    frames_in: summary.frames_in,
                                    frames_out: summary.frames_out,
                                    utterances: summary.utterances,
                                    barge_ins: summary.barge_ins,
                                }).await;
                                state.event_bridge.emit_session(SessionEvent::Ended {
                                    session_id: session_id.clone(),
                                    frames_in: summary.frames_in,
                                    frames_out: summary.frames_out,
                                    utterances: summary.utterances,
                                    barge_ins: summary.barge_ins,
                                    timestamp: now_ms(),
                                });
                                break 'session;
                            }

                            Ok(other) => {
                                log::warn!(
                                    "[WS] session {session_id} unexpected message type from client: {}",
                                    other.type_name()
                                );
                                break 'session;
                            }

                            Err(e) => {
                                log::warn!("[WS] session {session_id} protocol violation: {e}");
                                break 'session;
                            }
                        }
                    }

                    Some(Ok(Message::Binary(data))) => {
                        if session.state().is_closed() {
                            continue;
                        }
                        match AudioFrame::decode(Bytes::from(data)) {
                            Ok(frame) => match codec_adapter.to_agent(&frame.payload) {
                                Ok(agent_pcm) => {
                                    session.record_frame_in();
                                    let _ = inbound_tx.try_send(agent_pcm);
                                }
                                Err(e) => {
                                    log::warn!("[WS] session {session_id} dropping misaligned frame: {e}");
                                }
                            },
                            Err(e) => {
                                log::warn!("[WS] session {session_id} malformed audio frame: {e}");
                                break 'session;
                            }
                        }
                    }

                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break 'session,
                    Some(Err(e)) => {
                        log::warn!("[WS] session {session_id} transport error: {e}");
                        break 'session;
                    }
                }
            }

            frame = async { pending.as_mut().unwrap().audio_rx.recv().await }, if pending.is_some() => {
                match frame {
                    Some(agent_frame) => {
                        if let Some(p) = pending.as_mut() {
                            if !p.first_frame_sent {
                                p.first_frame_sent = true;
                                let response_id = p.response_id.clone();
                                let utterance_id = session.current_utterance_id.clone().unwrap_or_default();
                                let _ = session.begin_speaking(response_id.clone());
                                out_seq += 1;
                                let _ = send_control(&mut ws_tx, ControlMessage::ResponseStart {
                                    session_id: session_id.clone(),
                                    seq: out_seq,
                                    ts_ms: now_ms(),
                                    response_id,
                                    utterance_id,
                                }).await;
                            }
                        }

                        match codec_adapter.from_agent(&agent_frame) {
                            Ok(telephony_bytes) => {
                                out_stream_seq = out_stream_seq.wrapping_add(1);
                                let wire_frame = AudioFrame::new(
                                    OUTBOUND_STREAM_ID,
                                    out_stream_seq,
                                    out_stream_seq.wrapping_mul(telephony_format.frame_ms),
                                    telephony_bytes,
                                );
                                session.record_frame_out();
                                if ws_tx.send(Message::Binary(wire_frame.encode().to_vec().into())).await.is_err() {
                                    break 'session;
                                }
                            }
                            Err(e) => log::warn!("[WS] session {session_id} failed to encode outbound frame: {e}"),
                        }
                    }

                    None => {
                        if let Some(p) = pending.take() {
                            response_spawned_at = None;
                            match p.join.await {
                                Ok(Ok(ResponseOutcome::Completed { .. }))
                                | Ok(Ok(ResponseOutcome::Fallback { .. })) => {
                                    out_seq += 1;
                                    let _ = send_control(&mut ws_tx, ControlMessage::ResponseEnd {
                                        session_id: session_id.clone(),
                                        seq: out_seq,
                                        ts_ms: now_ms(),
                                        response_id: p.response_id,
                                    }).await;
                                    let _ = session.end_response();
                                }
                                Ok(Ok(ResponseOutcome::Cancelled { .. })) => {
                                    // barge_in already sent response.cancelled and moved the
                                    // session on to the interrupting utterance; nothing left to do.
                                }
                                Ok(Err(AspError::EmptyUtterance(reason))) => {
                                    out_seq += 1;
                                    let _ = send_control(&mut ws_tx, ControlMessage::Error {
                                        session_id: session_id.clone(),
                                        seq: out_seq,
                                        ts_ms: now_ms(),
                                        kind: "empty_utterance".into(),
                                        message: reason,
                                    }).await;
                                    let _ = session.transition(SessionState::ActiveListening);
                                }
                                Ok(Err(e)) => {
                                    log::error!("[WS] session {session_id} response failed: {e}");
                                    out_seq += 1;
                                    let _ = send_control(&mut ws_tx, ControlMessage::Error {
                                        session_id: session_id.clone(),
                                        seq: out_seq,
                                        ts_ms: now_ms(),
                                        kind: e.code().to_string(),
                                        message: e.to_string(),
                                    }).await;
                                    break 'session;
                                }
                                Err(join_err) => {
                                    log::error!("[WS] session {session_id} response task did not finish cleanly: {join_err}");
                                    break 'session;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if let Some(p) = pending.take() {
        cancel_and_reap(p);
    }
    session.close();
    let _ = ws_tx.close().await;
    log::info!("[WS] session {session_id} closed");
}

/// Closes the currently-accumulating utterance buffer and spawns a pipeline
/// task for it, shared by the real `audio.end` path and the `max_utterance_ms`
/// safety timer.
#[allow(clippy::too_many_arguments)]
fn dispatch_utterance(
    state: &AppState,
    context: &Arc<Mutex<ConversationContext>>,
    session: &mut Session,
    session_id: &str,
    agent_sample_rate: u32,
    inbound_tx: &mut mpsc::Sender<Bytes>,
    inbound_rx: &mut mpsc::Receiver<Bytes>,
    pending: &mut Option<PendingResponse>,
    response_spawned_at: &mut Option<Instant>,
    utterance_open_since: &mut Instant,
) {
    let utterance_id = Uuid::new_v4().to_string();
    let (new_tx, new_rx) = mpsc::channel::<Bytes>(INBOUND_CHANNEL_CAPACITY);
    let closed_tx = std::mem::replace(inbound_tx, new_tx);
    drop(closed_tx);
    let closed_rx = std::mem::replace(inbound_rx, new_rx);
    *utterance_open_since = Instant::now();

    if session.begin_utterance(utterance_id.clone()).is_ok() {
        state.event_bridge.emit_vad(VadEvent::SpeechEnd {
            session_id: session_id.to_string(),
            utterance_id,
            frame_count: session.summary().frames_in,
            timestamp: now_ms(),
        });
        let p = spawn_response(state, context, session_id, agent_sample_rate, closed_rx);
        *pending = Some(p);
        *response_spawned_at = Some(Instant::now());
    }
}
