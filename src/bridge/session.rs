/// Terminal session record and lifecycle
use std::time::{Duration, Instant};

use tracing::debug;

use crate::bridge::BridgeError;
use crate::resolver::Target;

/// Why a session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Principal could not be mapped to a target
    Resolution,
    /// Exec stream could not be opened
    Dial,
    /// Exec stream broke after it was established
    Stream,
    /// Inbound transport did not provide its streams
    Inbound,
}

/// Terminal session state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Resolving,
    Dialing,
    Streaming,
    Closing,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Created, Resolving)
                | (Resolving, Dialing)
                | (Resolving, Failed(_))
                | (Dialing, Streaming)
                | (Dialing, Failed(_))
                | (Streaming, Closing)
                | (Streaming, Failed(_))
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

/// Terminal session structure
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,

    /// Identity of the connecting client
    pub principal: String,

    /// Set once resolution succeeds
    pub target: Option<Target>,

    state: SessionState,

    started_at: Instant,
}

impl Session {
    pub fn new(id: String, principal: String) -> Self {
        Self {
            id,
            principal,
            target: None,
            state: SessionState::Created,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `next`, refusing anything that is not a forward edge
    pub fn transition(&mut self, next: SessionState) -> Result<(), BridgeError> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }
}
