/// Error types for the session bridge
use thiserror::Error;

use crate::bridge::SessionState;
use crate::exec::{DialError, StreamError};
use crate::inbound::ConnectionError;
use crate::resolver::ResolutionError;

/// Why a session ended abnormally. Shown to the client as the final line.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Lifecycle misuse, such as starting a session twice
    #[error("session cannot move from {from:?} to {to:?}")]
    InvalidState { from: SessionState, to: SessionState },
}
