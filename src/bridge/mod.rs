/// Session bridge: lifecycle of one terminal session
mod error;
mod session;
mod session_bridge;

pub use error::BridgeError;
pub use session::{FailureReason, Session, SessionState};
pub use session_bridge::{BridgeSettings, SessionBridge};
