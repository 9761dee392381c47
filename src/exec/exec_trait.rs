use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::inbound::ResizeEvent;
use crate::resolver::{ResolutionError, Target};

// ================ 配置与错误类型 ================

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which standard streams the exec request attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl Attachment {
    /// Interactive shell: everything attached
    pub const fn interactive() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            tty: true,
        }
    }

    /// Only the fully attached interactive configuration is supported
    pub fn validate(&self) -> Result<(), DialError> {
        if *self == Self::interactive() {
            Ok(())
        } else {
            Err(DialError::InvalidAttachment(*self))
        }
    }
}

impl Default for Attachment {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Per-dial settings supplied from process configuration
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub attach: Attachment,
    pub dial_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            attach: Attachment::interactive(),
            dial_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_millis(500),
        }
    }
}

/// What the orchestrator is asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub workload_id: String,
    pub container: String,
    pub command: Vec<String>,
    pub want_stdin: bool,
    pub want_stdout: bool,
    pub want_stderr: bool,
    pub want_tty: bool,
}

impl ExecRequest {
    pub fn new(target: &Target, attach: Attachment) -> Self {
        Self {
            namespace: target.namespace.clone(),
            workload_id: target.workload_id.clone(),
            container: target.container.clone(),
            command: target.command.clone(),
            want_stdin: attach.stdin,
            want_stdout: attach.stdout,
            want_stderr: attach.stderr,
            want_tty: attach.tty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    #[error("not authorized to exec into the workload: {0}")]
    AuthFailure(String),
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("failed to open exec stream: {0}")]
    TransportSetupFailure(String),
    #[error("unsupported stream attachment {0:?}: stdin, stdout, stderr and tty must all be requested")]
    InvalidAttachment(Attachment),
    #[error("incomplete target: {0}")]
    IncompleteTarget(#[from] ResolutionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("remote closed the exec stream: {0}")]
    RemoteClosed(String),
    #[error("exec transport broken: {0}")]
    TransportBroken(String),
    #[error("exec protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Exit indication reported by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExit {
    pub code: i32,
    pub message: Option<String>,
}

impl RemoteExit {
    pub fn success() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    /// Value suitable for an SSH `exit-status` reply
    pub fn exit_status(&self) -> u32 {
        u32::try_from(self.code).unwrap_or(1)
    }
}

// ================ 核心Trait定义 ================

/// Out-of-band control channel of a live exec stream
#[async_trait]
pub trait TerminalControl: Send {
    async fn resize(&mut self, size: ResizeEvent) -> Result<(), StreamError>;
}

/// The remote command behind an exec stream
#[async_trait]
pub trait RemoteProcess: Send {
    /// Wait for the remote command to exit. Cancel safe.
    async fn wait(&mut self) -> Result<RemoteExit, StreamError>;

    /// Sever the exec stream
    async fn abort(&mut self);
}

/// Raw endpoints of a freshly opened exec stream
pub struct ExecStreams {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    /// Absent when the orchestrator multiplexes stderr into the tty
    pub stderr: Option<BoxedReader>,
    pub control: Option<Box<dyn TerminalControl>>,
    pub process: Box<dyn RemoteProcess>,
}

/// Orchestration API client. Shared read-only by every session.
#[async_trait]
pub trait ExecClient: Send + Sync + Debug {
    /// Open one exec stream. Called only with validated requests.
    async fn open(&self, request: &ExecRequest) -> Result<ExecStreams, DialError>;

    /// Backend name
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_full_attachment_is_accepted() {
        assert!(Attachment::interactive().validate().is_ok());

        let partial = [
            Attachment { stdin: false, ..Attachment::interactive() },
            Attachment { stdout: false, ..Attachment::interactive() },
            Attachment { stderr: false, ..Attachment::interactive() },
            Attachment { tty: false, ..Attachment::interactive() },
        ];
        for attach in partial {
            assert_eq!(attach.validate(), Err(DialError::InvalidAttachment(attach)));
        }
    }

    #[test]
    fn negative_exit_codes_map_to_failure_status() {
        assert_eq!(RemoteExit::success().exit_status(), 0);
        let exit = RemoteExit { code: 127, message: None };
        assert_eq!(exit.exit_status(), 127);
        let exit = RemoteExit { code: -9, message: None };
        assert_eq!(exit.exit_status(), 1);
    }
}
