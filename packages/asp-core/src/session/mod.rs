//! Session state machine (C4, §4.4), shared by both ASP endpoints.
//!
//! The Session is single-owner: it lives inside the per-session supervisor
//! task (§5) and is never shared for mutation across tasks. Other tasks
//! submit state changes through the supervisor; this module only models the
//! legal states and transitions, not the task topology (that's `bootstrap`
//! and the two app binaries' driver loops).

use crate::audio::AudioFormat;
use crate::error::{AspError, AspResult};
use crate::vad::VadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capabilities,
    Starting,
    ActiveListening,
    ActiveProcessing,
    ActiveSpeaking,
    Ending,
    Closed,
}

impl SessionState {
    /// Legal transitions per the §4.4 diagram. `barge_in` while
    /// `ActiveListening` is legal but a no-op (stays `ActiveListening`),
    /// represented here as a self-transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Capabilities) => true,
            (Capabilities, Starting) => true,
            (Starting, ActiveListening) => true,
            (Starting, Closed) => true,
            (ActiveListening, ActiveProcessing) => true,
            (ActiveProcessing, ActiveSpeaking) => true,
            (ActiveProcessing, ActiveListening) => true,
            (ActiveSpeaking, ActiveListening) => true,
            (ActiveSpeaking, ActiveProcessing) => true,
            (ActiveListening, ActiveListening) => true,
            (ActiveListening, Ending)
            | (ActiveProcessing, Ending)
            | (ActiveSpeaking, Ending) => true,
            (Ending, Closed) => true,
            (_, Closed) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::ActiveListening
                | SessionState::ActiveProcessing
                | SessionState::ActiveSpeaking
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Plain counters reported in `session.ended` (§10.9).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSummary {
    pub frames_in: u64,
    pub frames_out: u64,
    pub utterances: u64,
    pub barge_ins: u64,
}

/// A single conversation attached to one call leg (§3).
pub struct Session {
    pub id: String,
    pub audio: AudioFormat,
    pub vad_config: VadConfig,
    pub started_at_ms: u64,
    state: SessionState,
    pub current_response_id: Option<String>,
    pub current_utterance_id: Option<String>,
    summary: SessionSummary,
    ended: bool,
}

impl Session {
    pub fn new(id: String, audio: AudioFormat, vad_config: VadConfig, started_at_ms: u64) -> Self {
        Self {
            id,
            audio,
            vad_config,
            started_at_ms,
            state: SessionState::Idle,
            current_response_id: None,
            current_utterance_id: None,
            summary: SessionSummary::default(),
            ended: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Attempts the transition, returning `ProtocolViolation` if illegal.
    pub fn transition(&mut self, next: SessionState) -> AspResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(AspError::ProtocolViolation(format!(
                "illegal transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn record_frame_in(&mut self) {
        self.summary.frames_in += 1;
    }

    pub fn record_frame_out(&mut self) {
        self.summary.frames_out += 1;
    }

    /// Called when `audio.end` closes a non-empty utterance (§4.4: Listening
    /// -> Processing).
    pub fn begin_utterance(&mut self, utterance_id: String) -> AspResult<()> {
        self.transition(SessionState::ActiveProcessing)?;
        self.current_utterance_id = Some(utterance_id);
        self.summary.utterances += 1;
        Ok(())
    }

    /// Called on the first outbound frame of a response — the
    /// `Active/Speaking` transition is marked by this, not by
    /// `response.start` (§4.4 invariant 3).
    pub fn begin_speaking(&mut self, response_id: String) -> AspResult<()> {
        self.transition(SessionState::ActiveSpeaking)?;
        self.current_response_id = Some(response_id);
        Ok(())
    }

    /// `response.end` / `response.cancelled`: return to `Listening`.
    pub fn end_response(&mut self) -> AspResult<()> {
        self.transition(SessionState::ActiveListening)?;
        self.current_response_id = None;
        Ok(())
    }

    /// `barge_in`: cancel the current response and immediately begin
    /// tracking the interrupting utterance (§4.4: Speaking -> Processing).
    pub fn barge_in(&mut self, new_utterance_id: String) -> AspResult<()> {
        self.transition(SessionState::ActiveProcessing)?;
        self.current_response_id = None;
        self.current_utterance_id = Some(new_utterance_id);
        self.summary.utterances += 1;
        self.summary.barge_ins += 1;
        Ok(())
    }

    pub fn begin_ending(&mut self) -> AspResult<()> {
        self.transition(SessionState::Ending)
    }

    /// Idempotent close (§8 invariant 6): closing an already-closed session
    /// is a no-op rather than a protocol violation.
    pub fn close(&mut self) {
        if !self.ended {
            self.ended = true;
            self.state = SessionState::Closed;
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> Session {
        Session::new(
            "S1".into(),
            AudioFormat::default(),
            VadConfig::default(),
            0,
        )
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let mut s = new_session();
        s.transition(SessionState::Capabilities).unwrap();
        s.transition(SessionState::Starting).unwrap();
        s.transition(SessionState::ActiveListening).unwrap();
        s.begin_utterance("U1".into()).unwrap();
        s.begin_speaking("R1".into()).unwrap();
        s.end_response().unwrap();
        assert_eq!(s.state(), SessionState::ActiveListening);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut s = new_session();
        let err = s.transition(SessionState::ActiveSpeaking).unwrap_err();
        assert!(matches!(err, AspError::ProtocolViolation(_)));
    }

    #[test]
    fn barge_in_while_listening_is_a_noop_self_transition() {
        let mut s = new_session();
        s.transition(SessionState::Capabilities).unwrap();
        s.transition(SessionState::Starting).unwrap();
        s.transition(SessionState::ActiveListening).unwrap();
        s.transition(SessionState::ActiveListening).unwrap();
        assert_eq!(s.state(), SessionState::ActiveListening);
    }

    #[test]
    fn barge_in_while_speaking_cancels_and_starts_new_utterance() {
        let mut s = new_session();
        s.transition(SessionState::Capabilities).unwrap();
        s.transition(SessionState::Starting).unwrap();
        s.transition(SessionState::ActiveListening).unwrap();
        s.begin_utterance("U1".into()).unwrap();
        s.begin_speaking("R1".into()).unwrap();

        s.barge_in("U2".into()).unwrap();
        assert_eq!(s.state(), SessionState::ActiveProcessing);
        assert_eq!(s.current_response_id, None);
        assert_eq!(s.summary().barge_ins, 1);
        assert_eq!(s.summary().utterances, 2);
    }

    #[test]
    fn close_is_idempotent() {
        let mut s = new_session();
        s.close();
        s.close();
        assert!(s.is_ended());
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn any_state_can_close() {
        let mut s = new_session();
        s.transition(SessionState::Capabilities).unwrap();
        s.transition(SessionState::Closed).unwrap();
        assert!(s.state().is_closed());
    }
}
