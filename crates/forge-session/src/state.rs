//! Session lifecycle states and the legal transitions between them.

use serde::{Deserialize, Serialize};

use crate::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// On disk only, not loaded.
    Suspended,
    Idle,
    Running,
    /// The agent asked the user a question.
    WaitingInput,
    /// Suspended until an awaited child reaches a stopping point.
    WaitingChildren,
    Completed,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Suspended => "suspended",
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::WaitingInput => "waiting_input",
            SessionState::WaitingChildren => "waiting_children",
            SessionState::Completed => "completed",
            SessionState::Error => "error",
        }
    }

    /// A session may only leave the registry at rest.
    pub fn can_unload(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Completed | SessionState::Error
        )
    }

    pub fn can_start_turn(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::WaitingInput | SessionState::WaitingChildren
        )
    }
}

/// Validate a state change. Self-transitions are no-ops and always legal.
pub fn ensure_transition(from: SessionState, to: SessionState) -> Result<(), SessionError> {
    use SessionState::*;
    let legal = match (from, to) {
        (a, b) if a == b => true,
        (Suspended, Idle) => true,
        (Idle | WaitingInput | WaitingChildren, Running) => true,
        (Running, Idle | WaitingInput | WaitingChildren | Completed | Error) => true,
        // Cancelling a wait or recovering an error returns to rest.
        (WaitingChildren, Idle | Error) => true,
        (Error, Idle) => true,
        (WaitingInput, Idle) => true,
        _ => false,
    };
    if legal {
        Ok(())
    } else {
        Err(SessionError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_lifecycle_transitions_are_legal() {
        ensure_transition(SessionState::Idle, SessionState::Running).expect("start");
        ensure_transition(SessionState::Running, SessionState::WaitingChildren).expect("wait");
        ensure_transition(SessionState::WaitingChildren, SessionState::Running).expect("resume");
        ensure_transition(SessionState::Running, SessionState::Idle).expect("finish");
    }

    #[test]
    fn a_resting_session_cannot_jump_to_waiting() {
        let err = ensure_transition(SessionState::Idle, SessionState::WaitingChildren)
            .expect_err("illegal");
        assert!(matches!(err, SessionError::IllegalTransition { .. }));
    }

    #[test]
    fn wire_spelling_is_snake_case() {
        let json = serde_json::to_string(&SessionState::WaitingChildren).expect("json");
        assert_eq!(json, "\"waiting_children\"");
    }
}
