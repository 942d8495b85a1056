//! Fixed protocol constants and default tunables for the Audio Session Protocol.
//!
//! Values in the first section are fixed by the wire format (§4.3, §6) and
//! changing them breaks compatibility with any other ASP implementation.
//! Values in the second section are operator tunables with spec-mandated
//! defaults (§4.2, §4.4, §4.6, §5); they may be overridden per deployment
//! or per session via [`crate::config::Config`].

// ─────────────────────────────────────────────────────────────────────────────
// Wire format (fixed)
// ─────────────────────────────────────────────────────────────────────────────

/// Size in bytes of the binary audio frame header (§6): stream_id, seq,
/// timestamp_ms (each u32) and flags (u8).
pub const AUDIO_FRAME_HEADER_LEN: usize = 13;

/// Bit 0 of the flags byte marks the frame as the last one of its stream.
pub const FRAME_FLAG_END_OF_STREAM: u8 = 0b0000_0001;

/// Reference ASP server port (§6).
pub const DEFAULT_LISTEN_PORT: u16 = 8765;

/// Fixed frame boundary for reframing (§4.1); the spec allows 10ms as a
/// configuration option but all internal framing math assumes a 20ms default.
pub const DEFAULT_FRAME_MS: u32 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Session state machine timers (§4.4)
// ─────────────────────────────────────────────────────────────────────────────

/// Time allowed between transport-up and a valid `session.start` before the
/// server gives up and closes.
pub const STARTING_TIMEOUT_MS: u64 = 5_000;

/// Time allowed between `audio.end` and the first outbound audio frame
/// before the server times out the response and returns to `Listening`.
pub const PROCESSING_TIMEOUT_MS: u64 = 10_000;

/// Time allowed with no audio in either direction before the session is
/// closed as idle.
pub const IDLE_TIMEOUT_MS: u64 = 300_000;

/// Interval between `ping` liveness checks.
pub const PING_INTERVAL_MS: u64 = 15_000;

/// Upper bound on a single caller utterance; exceeded utterances are
/// forcibly ended by a server-side safety timer (§8 Boundary behaviours).
pub const MAX_UTTERANCE_MS: u64 = 30_000;

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation & concurrency (§4.4, §5)
// ─────────────────────────────────────────────────────────────────────────────

/// Deadline from `barge_in` receipt to the last dispatched outbound frame.
pub const CANCEL_DEADLINE_MS: u64 = 50;

/// Deadline for a Session-level cancellation token to abort all child tasks.
pub const SESSION_CANCEL_DEADLINE_MS: u64 = 500;

/// Server transport-writer queue length that triggers TTS pull pausing.
pub const TX_HIGH_WATERMARK: usize = 25;

/// Server transport-writer queue length the pipeline must drain to before
/// resuming TTS pulls.
pub const TX_LOW_WATERMARK: usize = 10;

/// How long a backpressure pause may last before the response is cancelled.
pub const BACKPRESSURE_TIMEOUT_MS: u64 = 2_000;

// ─────────────────────────────────────────────────────────────────────────────
// VAD defaults (§4.2)
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive speech required before `speech.begin` fires.
pub const DEFAULT_MIN_SPEECH_MS: u32 = 120;

/// Consecutive non-speech required, following `speech.begin`, before
/// `speech.end` fires.
pub const DEFAULT_SILENCE_HANGOVER_MS: u32 = 600;

/// Consecutive speech required, while `Speaking`, before `barge_in` fires.
pub const DEFAULT_BARGE_IN_MIN_MS: u32 = 80;

/// Window over which the energy classifier's adaptive RMS floor is computed.
pub const RMS_ADAPTATION_WINDOW_MS: u64 = 2_000;

/// Percentile (of the adaptation window) used as the adaptive noise floor.
pub const RMS_ADAPTATION_PERCENTILE: f32 = 0.10;

// ─────────────────────────────────────────────────────────────────────────────
// Conversation pipeline (§4.6)
// ─────────────────────────────────────────────────────────────────────────────

/// Time the pipeline waits for a final STT transcript before falling back
/// to the last partial result.
pub const DEFAULT_STT_DEADLINE_MS: u64 = 1_500;

/// Sentence-chunking hard wrap: after this many characters with no sentence
/// boundary, the chunk breaks at the nearest whitespace.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 180;

/// Number of conversation turns kept before the oldest half is summarized.
pub const DEFAULT_HISTORY_MAX_TURNS: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Media server playout pacer (§4.5)
// ─────────────────────────────────────────────────────────────────────────────

/// Target jitter buffer depth, in frames (40ms at 20ms/frame).
pub const JITTER_BUFFER_TARGET_FRAMES: usize = 2;

/// Maximum jitter buffer depth, in frames (100ms at 20ms/frame), before the
/// oldest frame is dropped.
pub const JITTER_BUFFER_MAX_FRAMES: usize = 5;

/// Capacity of the broadcast channel carrying domain events to observers.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// serde defaults (for optional fields in control messages / config)
// ─────────────────────────────────────────────────────────────────────────────

pub fn default_silence_hangover_ms() -> u32 {
    DEFAULT_SILENCE_HANGOVER_MS
}

pub fn default_min_speech_ms() -> u32 {
    DEFAULT_MIN_SPEECH_MS
}

pub fn default_barge_in_min_ms() -> u32 {
    DEFAULT_BARGE_IN_MIN_MS
}
