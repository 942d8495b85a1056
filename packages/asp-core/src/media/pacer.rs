//! Playout pacer / jitter buffer (§4.5).
//!
//! Outbound audio must reach the telephony leg at real-time cadence: one
//! frame per `frame_ms` of wall clock, regardless of how bursty the
//! server's delivery is. Inbound frames are queued in a small jitter
//! buffer; underrun injects comfort silence, overflow drops the oldest
//! frame and reports `Backpressure`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioFormat;
use crate::events::{BackpressureEvent, EventEmitter};
use crate::media::channel::MediaChannel;
use crate::protocol_constants::{JITTER_BUFFER_MAX_FRAMES, JITTER_BUFFER_TARGET_FRAMES};

/// A small FIFO of pending outbound frames, bounded at `max_frames`.
pub struct JitterBuffer {
    queue: VecDeque<Bytes>,
    max_frames: usize,
}

impl JitterBuffer {
    pub fn new(max_frames: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_frames,
        }
    }

    /// Pushes a frame, dropping the oldest if the buffer is already full.
    /// Returns `true` if a drop occurred.
    pub fn push(&mut self, frame: Bytes) -> bool {
        let dropped = if self.queue.len() >= self.max_frames {
            self.queue.pop_front();
            true
        } else {
            false
        };
        self.queue.push_back(frame);
        dropped
    }

    pub fn pop(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_under_target(&self, target_frames: usize) -> bool {
        self.queue.len() < target_frames
    }

    /// Drops every queued frame at once (barge-in flush, §4.5 step 1).
    pub fn clear(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

/// Drives a [`JitterBuffer`] onto a [`MediaChannel`] at fixed real-time
/// cadence, injecting silence on underrun.
pub struct PlayoutPacer {
    buffer: Arc<Mutex<JitterBuffer>>,
    format: AudioFormat,
}

impl PlayoutPacer {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(JitterBuffer::new(JITTER_BUFFER_MAX_FRAMES))),
            format,
        }
    }

    pub fn buffer(&self) -> Arc<Mutex<JitterBuffer>> {
        Arc::clone(&self.buffer)
    }

    /// Enqueues a frame received from the server for eventual playout.
    /// Returns `true` if the buffer overflowed and dropped the oldest frame.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        self.buffer.lock().push(frame)
    }

    /// Clears all pending frames (barge-in flush).
    pub fn flush(&self) -> usize {
        self.buffer.lock().clear()
    }

    /// Runs the real-time delivery loop until cancelled. One tick per
    /// `frame_ms`; `MissedTickBehavior::Burst` catches the pacer up after a
    /// scheduling stall rather than permanently drifting.
    pub async fn run(
        &self,
        session_id: &str,
        channel: &dyn MediaChannel,
        emitter: &dyn EventEmitter,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.format.frame_ms as u64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let (frame, underran) = {
                        let mut buf = self.buffer.lock();
                        match buf.pop() {
                            Some(frame) => (frame, false),
                            None => (self.format.silence_frame(), true),
                        }
                    };

                    if underran {
                        emitter.emit_backpressure(BackpressureEvent::JitterBufferUnderrun {
                            session_id: session_id.to_string(),
                            timestamp: 0,
                        });
                    }

                    if let Err(e) = channel.write_frame(frame).await {
                        log::warn!("[Pacer] write_frame failed: {}", e);
                    }
                }
            }
        }
    }

    pub fn target_frames(&self) -> usize {
        JITTER_BUFFER_TARGET_FRAMES
    }
}
