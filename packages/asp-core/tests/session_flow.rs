//! Drives a full session over an in-memory duplex transport through the
//! happy-path and barge-in scenarios: a client task that behaves like
//! `apps/media-server`'s driver, and a server task that behaves like
//! `api/ws.rs`'s session supervisor, connected by two ends of the same
//! channel pair rather than a real socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use asp_core::vad::VadConfig as CoreVadConfig;
use asp_core::{
    bootstrap_services, AspError, AspResult, AudioFormat, AudioFrame, AudioParams, Config,
    ConversationContext, ConversationPipeline, Encoding, NoopEventEmitter, ResponseOutcome,
    Session, SessionState, Transport, TransportMessage, VadParams,
};
use asp_core::{ControlMessage, EventEmitter};

struct DuplexTransport {
    tx: mpsc::Sender<TransportMessage>,
    rx: mpsc::Receiver<TransportMessage>,
}

fn duplex_pair() -> (DuplexTransport, DuplexTransport) {
    let (tx_a, rx_a) = mpsc::channel(64);
    let (tx_b, rx_b) = mpsc::channel(64);
    (
        DuplexTransport { tx: tx_a, rx: rx_b },
        DuplexTransport { tx: tx_b, rx: rx_a },
    )
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send_control(&mut self, msg: ControlMessage) -> AspResult<()> {
        self.tx
            .send(TransportMessage::Control(msg))
            .await
            .map_err(|_| AspError::TransportLoss("peer dropped".into()))
    }

    async fn send_audio(&mut self, frame: Bytes) -> AspResult<()> {
        self.tx
            .send(TransportMessage::Audio(frame))
            .await
            .map_err(|_| AspError::TransportLoss("peer dropped".into()))
    }

    async fn recv(&mut self) -> AspResult<Option<TransportMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> AspResult<()> {
        Ok(())
    }
}

struct PendingResponse {
    response_id: String,
    cancel: CancellationToken,
    audio_rx: mpsc::Receiver<Bytes>,
    join: tokio::task::JoinHandle<AspResult<ResponseOutcome>>,
    first_frame_sent: bool,
}

fn spawn_response(
    pipeline: &Arc<ConversationPipeline>,
    context: &Arc<Mutex<ConversationContext>>,
    session_id: &str,
    sample_rate: u32,
    audio_in: mpsc::Receiver<Bytes>,
) -> PendingResponse {
    let response_id = Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let (audio_tx, audio_rx) = mpsc::channel(16);
    let pipeline = Arc::clone(pipeline);
    let context = Arc::clone(context);
    let session_id = session_id.to_string();
    let child_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        let mut guard = context.lock().await;
        pipeline
            .run_utterance(
                &session_id,
                audio_in,
                None,
                sample_rate,
                &mut guard,
                audio_tx,
                16,
                &NoopEventEmitter,
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

/// Signals cancellation and lets the response task run to completion
/// instead of `abort()`ing it, mirroring `api/ws.rs`'s `cancel_and_reap` so
/// `run_utterance`'s own `cancel.cancelled()` branch gets to record the
/// `[interrupted]` turn.
fn cancel_and_reap(p: PendingResponse) {
    p.cancel.cancel();
    let PendingResponse { join, audio_rx, .. } = p;
    tokio::spawn(async move {
        let _audio_rx = audio_rx;
        let _ = join.await;
    });
}

/// A minimal stand-in for `api/ws.rs`'s session supervisor, generic over
/// `Transport` instead of axum, driving exactly one session to completion.
async fn run_test_server(
    mut transport: DuplexTransport,
    context: Arc<Mutex<ConversationContext>>,
) {
    let services = bootstrap_services(&Config::default()).expect("bootstrap");
    let pipeline = services.pipeline;

    transport
        .send_control(ControlMessage::ProtocolCapabilities {
            session_id: String::new(),
            seq: 0,
            ts_ms: 0,
            sample_rates: vec![8000, 16000],
            encodings: vec!["pcm_s16le".into(), "mulaw".into()],
            features: vec!["barge_in".into(), "streaming_tts".into()],
        })
        .await
        .unwrap();

    let (session_id, audio, vad) = match transport.recv().await.unwrap() {
        Some(TransportMessage::Control(ControlMessage::SessionStart {
            session_id,
            audio,
            vad,
            ..
        })) => (session_id, audio, vad),
        other => panic!("expected session.start, got {other:?}"),
    };

    let telephony = AudioFormat::new(audio.sample_rate, Encoding::PcmS16le, audio.frame_ms);
    let mut session = Session::new(
        session_id.clone(),
        telephony,
        CoreVadConfig {
            min_speech_ms: vad.min_speech_ms,
            silence_hangover_ms: vad.silence_hangover_ms,
            barge_in_min_ms: vad.barge_in_min_ms,
            frame_ms: audio.frame_ms,
        },
        0,
    );
    session.transition(SessionState::Capabilities).unwrap();
    session.transition(SessionState::Starting).unwrap();
    session.transition(SessionState::ActiveListening).unwrap();

    transport
        .send_control(ControlMessage::SessionStarted {
            session_id: session_id.clone(),
            seq: 1,
            ts_ms: 0,
            audio: AudioParams {
                sample_rate: audio.sample_rate,
                encoding: audio.encoding.clone(),
                frame_ms: audio.frame_ms,
            },
        })
        .await
        .unwrap();

    let (mut inbound_tx, mut inbound_rx) = mpsc::channel::<Bytes>(64);
    let mut pending: Option<PendingResponse> = None;
    let mut out_seq: u32 = 0;
    let mut ctrl_seq: u64 = 2;

    loop {
        tokio::select! {
            frame = async { pending.as_mut().unwrap().audio_rx.recv().await }, if pending.is_some() => {
                match frame {
                    Some(agent_pcm) => {
                        let p = pending.as_mut().unwrap();
                        if !p.first_frame_sent {
                            p.first_frame_sent = true;
                            session.begin_speaking(p.response_id.clone()).unwrap();
                            transport.send_control(ControlMessage::ResponseStart {
                                session_id: session_id.clone(),
                                seq: ctrl_seq,
                                ts_ms: 0,
                                response_id: p.response_id.clone(),
                                utterance_id: session.current_utterance_id.clone().unwrap_or_default(),
                            }).await.unwrap();
                            ctrl_seq += 1;
                        }
                        let timestamp_ms = out_seq.wrapping_mul(audio.frame_ms);
                        let frame = AudioFrame::new(1, out_seq, timestamp_ms, agent_pcm);
                        out_seq = out_seq.wrapping_add(1);
                        session.record_frame_out();
                        transport.send_audio(frame.encode()).await.unwrap();
                    }
                    None => {
                        let p = pending.take().unwrap();
                        match p.join.await.unwrap() {
                            Ok(ResponseOutcome::Completed { .. }) | Ok(ResponseOutcome::Fallback { .. }) => {
                                transport.send_control(ControlMessage::ResponseEnd {
                                    session_id: session_id.clone(),
                                    seq: ctrl_seq,
                                    ts_ms: 0,
                                    response_id: p.response_id.clone(),
                                }).await.unwrap();
                                ctrl_seq += 1;
                                session.end_response().unwrap();
                            }
                            Ok(ResponseOutcome::Cancelled { .. }) => {}
                            Err(AspError::EmptyUtterance(_)) => {
                                transport.send_control(ControlMessage::Error {
                                    session_id: session_id.clone(),
                                    seq: ctrl_seq,
                                    ts_ms: 0,
                                    kind: "empty_utterance".into(),
                                    message: "no speech detected".into(),
                                }).await.unwrap();
                                ctrl_seq += 1;
                                session.transition(SessionState::ActiveListening).unwrap();
                            }
                            Err(e) => panic!("pipeline error: {e}"),
                        }
                    }
                }
            }

            msg = transport.recv() => {
                match msg.unwrap() {
                    Some(TransportMessage::Audio(bytes)) => {
                        let frame = AudioFrame::decode(bytes).unwrap();
                        session.record_frame_in();
                        let _ = inbound_tx.try_send(frame.payload);
                    }
                    Some(TransportMessage::Control(ControlMessage::AudioEnd { .. })) => {
                        let utterance_id = Uuid::new_v4().to_string();
                        session.begin_utterance(utterance_id).unwrap();
                        let (new_tx, new_rx) = mpsc::channel(64);
                        let old_rx = std::mem::replace(&mut inbound_rx, new_rx);
                        inbound_tx = new_tx;
                        pending = Some(spawn_response(&pipeline, &context, &session_id, audio.sample_rate, old_rx));
                    }
                    Some(TransportMessage::Control(ControlMessage::BargeIn { response_id, .. })) => {
                        if pending.is_some() && session.state() == SessionState::ActiveSpeaking {
                            let p = pending.take().unwrap();
                            cancel_and_reap(p);
                            let new_utterance_id = Uuid::new_v4().to_string();
                            session.barge_in(new_utterance_id).unwrap();
                            transport.send_control(ControlMessage::ResponseCancelled {
                                session_id: session_id.clone(),
                                seq: ctrl_seq,
                                ts_ms: 0,
                                response_id,
                            }).await.unwrap();
                            ctrl_seq += 1;
                            let (new_tx, new_rx) = mpsc::channel(64);
                            let old_rx = std::mem::replace(&mut inbound_rx, new_rx);
                            inbound_tx = new_tx;
                            pending = Some(spawn_response(&pipeline, &context, &session_id, audio.sample_rate, old_rx));
                        }
                    }
                    Some(TransportMessage::Control(ControlMessage::SessionEnd { .. })) => {
                        let summary = session.summary();
                        transport.send_control(ControlMessage::SessionEnded {
                            session_id: session_id.clone(),
                            seq: ctrl_seq,
                            ts_ms: 0,
                            frames_in: summary.frames_in,
                            frames_out: summary.frames_out,
                            utterances: summary.utterances,
                            barge_ins: summary.barge_ins,
                        }).await.unwrap();
                        session.close();
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }
}

fn speech_frame() -> Bytes {
    // 20ms @ 8kHz mono s16le = 320 bytes; a nonzero tone so EchoSpeechToText
    // sees a nonempty capture stream.
    let mut buf = Vec::with_capacity(320);
    for i in 0..160u32 {
        let sample = ((i as f32 * 0.3).sin() * 6000.0) as i16;
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(buf)
}

#[tokio::test]
async fn happy_path_short_turn() {
    let (mut client, server) = duplex_pair();
    let context = Arc::new(Mutex::new(ConversationContext::new(20)));
    let server_task = tokio::spawn(run_test_server(server, Arc::clone(&context)));

    assert!(matches!(
        client.recv().await.unwrap(),
        Some(TransportMessage::Control(ControlMessage::ProtocolCapabilities { .. }))
    ));

    client
        .send_control(ControlMessage::SessionStart {
            session_id: "S1".into(),
            seq: 0,
            ts_ms: 0,
            audio: AudioParams {
                sample_rate: 8_000,
                encoding: "pcm_s16le".into(),
                frame_ms: 20,
            },
            vad: VadParams {
                silence_hangover_ms: 600,
                min_speech_ms: 120,
                barge_in_min_ms: 80,
            },
            system_prompt_ref: None,
        })
        .await
        .unwrap();

    assert!(matches!(
        client.recv().await.unwrap(),
        Some(TransportMessage::Control(ControlMessage::SessionStarted { .. }))
    ));

    for seq in 0..50u32 {
        let frame = AudioFrame::new(1, seq, seq * 20, speech_frame());
        client.send_audio(frame.encode()).await.unwrap();
    }
    client
        .send_control(ControlMessage::AudioEnd {
            session_id: "S1".into(),
            seq: 1,
            ts_ms: 1_000,
            stream_id: 1,
        })
        .await
        .unwrap();

    let response_id = timeout(Duration::from_secs(2), async {
        loop {
            match client.recv().await.unwrap() {
                Some(TransportMessage::Control(ControlMessage::ResponseStart { response_id, .. })) => {
                    return response_id;
                }
                Some(_) => continue,
                None => panic!("transport closed before response.start"),
            }
        }
    })
    .await
    .expect("response.start within budget");

    let mut frames_received = 0;
    let ended_response_id = timeout(Duration::from_secs(2), async {
        loop {
            match client.recv().await.unwrap() {
                Some(TransportMessage::Audio(_)) => frames_received += 1,
                Some(TransportMessage::Control(ControlMessage::ResponseEnd { response_id, .. })) => {
                    return response_id;
                }
                Some(_) => continue,
                None => panic!("transport closed before response.end"),
            }
        }
    })
    .await
    .expect("response.end within budget");

    assert_eq!(response_id, ended_response_id);
    assert!(frames_received > 0);

    client
        .send_control(ControlMessage::SessionEnd {
            session_id: "S1".into(),
            seq: 2,
            ts_ms: 2_000,
        })
        .await
        .unwrap();

    match client.recv().await.unwrap() {
        Some(TransportMessage::Control(ControlMessage::SessionEnded {
            frames_in, utterances, barge_ins, ..
        })) => {
            assert_eq!(frames_in, 50);
            assert_eq!(utterances, 1);
            assert_eq!(barge_ins, 0);
        }
        other => panic!("expected session.ended, got {other:?}"),
    }

    server_task.await.unwrap();
}

#[tokio::test]
async fn barge_in_cancels_response() {
    let (mut client, server) = duplex_pair();
    let context = Arc::new(Mutex::new(ConversationContext::new(20)));
    let server_task = tokio::spawn(run_test_server(server, Arc::clone(&context)));

    client.recv().await.unwrap(); // protocol.capabilities

    client
        .send_control(ControlMessage::SessionStart {
            session_id: "S2".into(),
            seq: 0,
            ts_ms: 0,
            audio: AudioParams {
                sample_rate: 8_000,
                encoding: "pcm_s16le".into(),
                frame_ms: 20,
            },
            vad: VadParams {
                silence_hangover_ms: 600,
                min_speech_ms: 120,
                barge_in_min_ms: 80,
            },
            system_prompt_ref: None,
        })
        .await
        .unwrap();
    client.recv().await.unwrap(); // session.started

    for seq in 0..50u32 {
        let frame = AudioFrame::new(1, seq, seq * 20, speech_frame());
        client.send_audio(frame.encode()).await.unwrap();
    }
    client
        .send_control(ControlMessage::AudioEnd {
            session_id: "S2".into(),
            seq: 1,
            ts_ms: 1_000,
            stream_id: 1,
        })
        .await
        .unwrap();

    let response_id = timeout(Duration::from_secs(2), async {
        loop {
            match client.recv().await.unwrap() {
                Some(TransportMessage::Control(ControlMessage::ResponseStart { response_id, .. })) => {
                    return response_id;
                }
                Some(_) => continue,
                None => panic!("transport closed before response.start"),
            }
        }
    })
    .await
    .expect("response.start within budget");

    // Let a handful of outbound frames through before interrupting, as in
    // the barge-in scenario.
    let mut seen_audio_frames = 0;
    while seen_audio_frames < 3 {
        match client.recv().await.unwrap() {
            Some(TransportMessage::Audio(_)) => seen_audio_frames += 1,
            Some(_) => continue,
            None => panic!("transport closed mid-response"),
        }
    }

    client
        .send_control(ControlMessage::BargeIn {
            session_id: "S2".into(),
            seq: 2,
            ts_ms: 1_100,
            response_id: response_id.clone(),
        })
        .await
        .unwrap();

    let cancelled_id = timeout(Duration::from_millis(500), async {
        loop {
            match client.recv().await.unwrap() {
                Some(TransportMessage::Control(ControlMessage::ResponseCancelled { response_id, .. })) => {
                    return response_id;
                }
                Some(_) => continue,
                None => panic!("transport closed before response.cancelled"),
            }
        }
    })
    .await
    .expect("response.cancelled within cancel_deadline budget");
    assert_eq!(cancelled_id, response_id);

    // The cancelled response task keeps running briefly after
    // response.cancelled goes out (cancel_and_reap lets it reach its own
    // cancellation checkpoint); give it a moment to record the turn.
    timeout(Duration::from_millis(500), async {
        loop {
            let messages = context.lock().await.messages_for_generation();
            if messages.iter().any(|m| m.content.ends_with("[interrupted]")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("interrupted turn recorded within budget");

    // Interrupting speech becomes the next utterance; end it to finish the
    // session cleanly.
    for seq in 50..70u32 {
        let frame = AudioFrame::new(1, seq, seq * 20, speech_frame());
        client.send_audio(frame.encode()).await.unwrap();
    }
    client
        .send_control(ControlMessage::AudioEnd {
            session_id: "S2".into(),
            seq: 3,
            ts_ms: 2_000,
            stream_id: 1,
        })
        .await
        .unwrap();

    // Drain until the second response completes, then end the session.
    timeout(Duration::from_secs(2), async {
        loop {
            match client.recv().await.unwrap() {
                Some(TransportMessage::Control(ControlMessage::ResponseEnd { .. })) => return,
                Some(_) => continue,
                None => panic!("transport closed before second response.end"),
            }
        }
    })
    .await
    .expect("second response.end within budget");

    client
        .send_control(ControlMessage::SessionEnd {
            session_id: "S2".into(),
            seq: 4,
            ts_ms: 3_000,
        })
        .await
        .unwrap();

    match client.recv().await.unwrap() {
        Some(TransportMessage::Control(ControlMessage::SessionEnded { barge_ins, utterances, .. })) => {
            assert_eq!(barge_ins, 1);
            assert_eq!(utterances, 2);
        }
        other => panic!("expected session.ended, got {other:?}"),
    }

    server_task.await.unwrap();
}
