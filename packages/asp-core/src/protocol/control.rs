//! Control JSON envelope and message vocabulary (§4.3, §6).
//!
//! Every control message is `{"type": ..., "session_id": ..., "seq": ...,
//! "ts_ms": ..., ...}`. The `type` tag selects the variant; unknown types
//! are a `ProtocolViolation`, not a silently-ignored message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "protocol.capabilities")]
    ProtocolCapabilities {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        sample_rates: Vec<u32>,
        encodings: Vec<String>,
        features: Vec<String>,
    },

    #[serde(rename = "session.start")]
    SessionStart {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        audio: AudioParams,
        vad: VadParams,
        #[serde(default)]
        system_prompt_ref: Option<String>,
    },

    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        audio: AudioParams,
    },

    #[serde(rename = "session.rejected")]
    SessionRejected {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        reason: String,
    },

    #[serde(rename = "audio.end")]
    AudioEnd {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        stream_id: u32,
    },

    #[serde(rename = "barge_in")]
    BargeIn {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        response_id: String,
    },

    #[serde(rename = "response.start")]
    ResponseStart {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        response_id: String,
        utterance_id: String,
    },

    #[serde(rename = "response.end")]
    ResponseEnd {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        response_id: String,
    },

    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        response_id: String,
    },

    #[serde(rename = "ping")]
    Ping {
        session_id: String,
        seq: u64,
        ts_ms: u64,
    },

    #[serde(rename = "pong")]
    Pong {
        session_id: String,
        seq: u64,
        ts_ms: u64,
    },

    #[serde(rename = "session.end")]
    SessionEnd {
        session_id: String,
        seq: u64,
        ts_ms: u64,
    },

    #[serde(rename = "session.ended")]
    SessionEnded {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        frames_in: u64,
        frames_out: u64,
        utterances: u64,
        barge_ins: u64,
    },

    #[serde(rename = "error")]
    Error {
        session_id: String,
        seq: u64,
        ts_ms: u64,
        kind: String,
        message: String,
    },
}

impl ControlMessage {
    pub fn session_id(&self) -> &str {
        match self {
            Self::ProtocolCapabilities { session_id, .. }
            | Self::SessionStart { session_id, .. }
            | Self::SessionStarted { session_id, .. }
            | Self::SessionRejected { session_id, .. }
            | Self::AudioEnd { session_id, .. }
            | Self::BargeIn { session_id, .. }
            | Self::ResponseStart { session_id, .. }
            | Self::ResponseEnd { session_id, .. }
            | Self::ResponseCancelled { session_id, .. }
            | Self::Ping { session_id, .. }
            | Self::Pong { session_id, .. }
            | Self::SessionEnd { session_id, .. }
            | Self::SessionEnded { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::ProtocolCapabilities { seq, .. }
            | Self::SessionStart { seq, .. }
            | Self::SessionStarted { seq, .. }
            | Self::SessionRejected { seq, .. }
            | Self::AudioEnd { seq, .. }
            | Self::BargeIn { seq, .. }
            | Self::ResponseStart { seq, .. }
            | Self::ResponseEnd { seq, .. }
            | Self::ResponseCancelled { seq, .. }
            | Self::Ping { seq, .. }
            | Self::Pong { seq, .. }
            | Self::SessionEnd { seq, .. }
            | Self::SessionEnded { seq, .. }
            | Self::Error { seq, .. } => *seq,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ProtocolCapabilities { .. } => "protocol.capabilities",
            Self::SessionStart { .. } => "session.start",
            Self::SessionStarted { .. } => "session.started",
            Self::SessionRejected { .. } => "session.rejected",
            Self::AudioEnd { .. } => "audio.end",
            Self::BargeIn { .. } => "barge_in",
            Self::ResponseStart { .. } => "response.start",
            Self::ResponseEnd { .. } => "response.end",
            Self::ResponseCancelled { .. } => "response.cancelled",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::SessionEnd { .. } => "session.end",
            Self::SessionEnded { .. } => "session.ended",
            Self::Error { .. } => "error",
        }
    }
}

/// Negotiated or requested audio parameters (`session.start`/`session.started`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub encoding: String,
    pub frame_ms: u32,
}

/// VAD parameters requested at `session.start`; fields default to the
/// protocol defaults when omitted so a client can negotiate only what it
/// cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadParams {
    #[serde(default = "crate::protocol_constants::default_silence_hangover_ms")]
    pub silence_hangover_ms: u32,
    #[serde(default = "crate::protocol_constants::default_min_speech_ms")]
    pub min_speech_ms: u32,
    #[serde(default = "crate::protocol_constants::default_barge_in_min_ms")]
    pub barge_in_min_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_start_round_trips_through_json() {
        let msg = ControlMessage::SessionStart {
            session_id: "S1".into(),
            seq: 1,
            ts_ms: 0,
            audio: AudioParams {
                sample_rate: 8000,
                encoding: "pcm_s16le".into(),
                frame_ms: 20,
            },
            vad: VadParams {
                silence_hangover_ms: 600,
                min_speech_ms: 120,
                barge_in_min_ms: 80,
            },
            system_prompt_ref: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"session.start\""));

        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.type_name(), "session.start");
        assert_eq!(back.session_id(), "S1");
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"bogus.type","session_id":"S1","seq":1,"ts_ms":0}"#;
        assert!(serde_json::from_str::<ControlMessage>(json).is_err());
    }

    #[test]
    fn vad_params_default_when_omitted() {
        let json = r#"{"sample_rate":8000}"#;
        // AudioParams has no defaults (all required); VadParams does.
        let vad_json = r#"{}"#;
        let vad: VadParams = serde_json::from_str(vad_json).unwrap();
        assert_eq!(vad.silence_hangover_ms, 600);
        let _ = json;
    }

    #[test]
    fn session_ended_carries_summary_counters() {
        let msg = ControlMessage::SessionEnded {
            session_id: "S1".into(),
            seq: 9,
            ts_ms: 1000,
            frames_in: 50,
            frames_out: 80,
            utterances: 1,
            barge_ins: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["frames_in"], 50);
        assert_eq!(json["utterances"], 1);
    }
}
