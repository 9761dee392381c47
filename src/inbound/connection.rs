/// Terminal connection trait for abstracting the inbound transport
use std::fmt::Debug;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::exec::BoxedReader;
use crate::inbound::OutputSink;

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Streams were already handed out
    #[error("Connection streams already taken")]
    StreamsTaken,
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Terminal geometry reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub rows: u16,
    pub cols: u16,
}

impl ResizeEvent {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { rows, cols }
    }

    /// SSH carries geometry as u32; anything larger than a u16 is clamped
    pub fn from_ssh(col_width: u32, row_height: u32) -> Self {
        Self::new(
            u16::try_from(col_width).unwrap_or(u16::MAX),
            u16::try_from(row_height).unwrap_or(u16::MAX),
        )
    }
}

/// Latest-value feed of terminal geometry. Superseded values are overwritten.
pub type ResizeFeed = watch::Receiver<Option<ResizeEvent>>;

/// Byte and control endpoints of one inbound session
pub struct InboundStreams {
    /// Client keystrokes
    pub input: BoxedReader,
    /// Bytes shown to the client
    pub output: OutputSink,
    pub resize: ResizeFeed,
    /// Cancelled when the client disconnects. End of `input` alone is only a half-close.
    pub hangup: CancellationToken,
}

impl Debug for InboundStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStreams")
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// One connected terminal client, as seen by the session bridge
#[async_trait::async_trait]
pub trait InboundConnection: Send + Debug {
    /// Get the connection ID
    fn id(&self) -> &str;

    /// Identity established by the transport
    fn principal(&self) -> &str;

    /// Hand the byte and resize endpoints to the bridge. `None` once taken.
    fn take_streams(&mut self) -> Option<InboundStreams>;

    /// Close the connection, reporting `exit_status` where the transport supports it
    async fn close(&mut self, exit_status: u32) -> ConnectionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_ssh_geometry_is_clamped() {
        assert_eq!(ResizeEvent::from_ssh(120, 40), ResizeEvent::new(120, 40));
        assert_eq!(
            ResizeEvent::from_ssh(70_000, 24),
            ResizeEvent { rows: 24, cols: u16::MAX }
        );
    }
}
