//! Per-session protocol state machine.
//!
//! ```text
//! Pending --attach--> Bound --initialized--> Ready
//!    ^                  |                      |
//!    |               detach                 detach
//!    |                  v                      v
//!    +------------- Closed <-------------------+
//!          (re-attach returns to Bound)
//! ```

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no event channel attached yet.
    Pending,
    /// Event channel attached, handshake not completed.
    Bound,
    /// Initialize handshake completed.
    Ready,
    /// Event channel detached. Evicted after a grace period unless re-attached.
    Closed,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Attach,
    Initialized,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event:?} to a {state} session")]
pub struct TransitionError {
    pub state: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Compute the next state. Never mutates anything.
    pub fn apply(self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Pending | Closed, Attach) => Ok(Bound),
            (Bound | Ready, Initialized) => Ok(Ready),
            (Pending | Bound | Ready, Detach) => Ok(Closed),
            (state, event) => Err(TransitionError { state, event }),
        }
    }

    /// Whether requests submitted for this session can be answered.
    pub fn accepts_requests(self) -> bool {
        matches!(self, SessionState::Bound | SessionState::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Bound => "bound",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
