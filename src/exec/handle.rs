use std::fmt::{self, Debug};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::{
    BoxedReader, BoxedWriter, DialError, ExecClient, ExecConfig, ExecRequest, ExecStreams,
    RemoteExit, RemoteProcess, StreamError, TerminalControl,
};
use crate::inbound::OutputSink;
use crate::resolver::Target;

const BUFFER_SIZE: usize = 4096;

/// How a finished stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The remote command exited
    RemoteExited(RemoteExit),
    /// The inbound side disconnected first
    InboundClosed,
    /// The caller's cancellation token fired
    Cancelled,
}

/// Open an exec stream for `target`.
///
/// Attachment and target are validated before the backend is contacted.
/// Single attempt; retrying an interactive shell would duplicate input.
pub async fn dial(
    client: &dyn ExecClient,
    target: &Target,
    config: &ExecConfig,
) -> Result<RemoteExecHandle, DialError> {
    config.attach.validate()?;
    target.ensure_complete()?;

    let request = ExecRequest::new(target, config.attach);
    debug!("Dialing {} via {} backend", target, client.name());

    let streams = tokio::time::timeout(config.dial_timeout, client.open(&request))
        .await
        .map_err(|_| {
            DialError::TransportSetupFailure(format!(
                "no exec stream for {} after {:?}",
                target, config.dial_timeout
            ))
        })??;

    info!("Exec stream open for {}", target);
    Ok(RemoteExecHandle::new(target.clone(), streams, config.drain_timeout))
}

struct RemoteIo {
    stdin: BoxedWriter,
    stdout: BoxedReader,
    stderr: Option<BoxedReader>,
}

/// A live exec stream. The session bridge owns it and decides when it closes.
pub struct RemoteExecHandle {
    target: Target,
    io: Option<RemoteIo>,
    control: Option<Box<dyn TerminalControl>>,
    process: Box<dyn RemoteProcess>,
    drain_timeout: Duration,
    closed: bool,
}

impl Debug for RemoteExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteExecHandle")
            .field("target", &self.target)
            .field("streaming", &self.io.is_none())
            .field("closed", &self.closed)
            .finish()
    }
}

#[derive(Debug)]
enum InputEnd {
    /// Inbound read failed; the client is gone
    Broken,
    Cancelled,
    RemoteGone(String),
}

#[derive(Debug)]
enum OutputEnd {
    Eof,
    Cancelled,
    SinkClosed,
    Failed(StreamError),
}

enum OutputEvent {
    SinkClosed,
    Failed(StreamError),
}

enum FirstEnd {
    Remote(Result<RemoteExit, StreamError>),
    Input(Result<InputEnd, tokio::task::JoinError>),
    Output(OutputEvent),
    Hangup,
    Cancelled,
}

impl RemoteExecHandle {
    pub fn new(target: Target, streams: ExecStreams, drain_timeout: Duration) -> Self {
        let ExecStreams {
            stdin,
            stdout,
            stderr,
            control,
            process,
        } = streams;
        Self {
            target,
            io: Some(RemoteIo {
                stdin,
                stdout,
                stderr,
            }),
            control,
            process,
            drain_timeout,
            closed: false,
        }
    }

    /// Take the resize channel, if the backend offers one
    pub fn take_control(&mut self) -> Option<Box<dyn TerminalControl>> {
        self.control.take()
    }

    /// Splice the exec stream with the caller's endpoints until one side ends.
    ///
    /// Runs inbound → stdin, stdout → `stdout_sink` and stderr → `stderr_sink`
    /// as separate tasks. End of `input` only closes remote stdin; the stream
    /// goes on until the remote exits, `hangup` fires, the output sinks close
    /// or `cancel` fires. Every task is cancelled and joined before this
    /// returns. Remote output keeps draining for the configured window after
    /// the remote exits. Can only be called once.
    pub async fn stream(
        &mut self,
        input: BoxedReader,
        stdout_sink: OutputSink,
        stderr_sink: OutputSink,
        hangup: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, StreamError> {
        let io = self.io.take().ok_or_else(|| {
            StreamError::ProtocolViolation("exec stream already consumed".to_string())
        })?;
        let paths = cancel.child_token();

        let mut input_path = tokio::spawn(pump_input(input, io.stdin, paths.clone()));
        let mut output_paths = JoinSet::new();
        output_paths.spawn(pump_output("stdout", io.stdout, stdout_sink, paths.clone()));
        if let Some(stderr) = io.stderr {
            output_paths.spawn(pump_output("stderr", stderr, stderr_sink, paths.clone()));
        }

        let first = tokio::select! {
            waited = self.process.wait() => FirstEnd::Remote(waited),
            joined = &mut input_path => FirstEnd::Input(joined),
            event = watch_outputs(&mut output_paths) => FirstEnd::Output(event),
            _ = hangup.cancelled() => FirstEnd::Hangup,
            _ = cancel.cancelled() => FirstEnd::Cancelled,
        };

        let mut input_joined = false;
        let outcome = match first {
            FirstEnd::Remote(Ok(exit)) => {
                drain_outputs(&mut output_paths, self.drain_timeout, &self.target).await;
                Ok(StreamEnd::RemoteExited(exit))
            }
            FirstEnd::Remote(Err(e)) => Err(e),
            FirstEnd::Input(joined) => {
                input_joined = true;
                match joined {
                    Ok(InputEnd::Broken) => Ok(StreamEnd::InboundClosed),
                    Ok(InputEnd::Cancelled) => Ok(StreamEnd::Cancelled),
                    Ok(InputEnd::RemoteGone(reason)) => {
                        // stdin refusing writes usually means the command is exiting
                        match tokio::time::timeout(self.drain_timeout, self.process.wait()).await {
                            Ok(Ok(exit)) => {
                                drain_outputs(&mut output_paths, self.drain_timeout, &self.target).await;
                                Ok(StreamEnd::RemoteExited(exit))
                            }
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(StreamError::TransportBroken(format!(
                                "remote stdin closed: {reason}"
                            ))),
                        }
                    }
                    Err(e) => Err(StreamError::TransportBroken(format!(
                        "input path failed: {e}"
                    ))),
                }
            }
            FirstEnd::Output(OutputEvent::SinkClosed) => Ok(StreamEnd::InboundClosed),
            FirstEnd::Output(OutputEvent::Failed(e)) => Err(e),
            FirstEnd::Hangup => Ok(StreamEnd::InboundClosed),
            FirstEnd::Cancelled => Ok(StreamEnd::Cancelled),
        };

        paths.cancel();
        if !input_joined {
            let _ = input_path.await;
        }
        while output_paths.join_next().await.is_some() {}

        debug!("Exec stream for {} ended: {:?}", self.target, outcome);
        outcome
    }

    /// Sever the exec stream. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.process.abort().await;
        debug!("Exec stream for {} closed", self.target);
    }
}

/// Let remote output finish after the command exited, within `window`
async fn drain_outputs(output_paths: &mut JoinSet<OutputEnd>, window: Duration, target: &Target) {
    let drained = tokio::time::timeout(window, async {
        while output_paths.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Output of {} still open after {:?}", target, window);
    }
}

/// Resolves on the first output failure; pending while paths end cleanly
async fn watch_outputs(paths: &mut JoinSet<OutputEnd>) -> OutputEvent {
    while let Some(joined) = paths.join_next().await {
        match joined {
            Ok(OutputEnd::Eof) | Ok(OutputEnd::Cancelled) => continue,
            Ok(OutputEnd::SinkClosed) => return OutputEvent::SinkClosed,
            Ok(OutputEnd::Failed(e)) => return OutputEvent::Failed(e),
            Err(e) => {
                return OutputEvent::Failed(StreamError::TransportBroken(format!(
                    "output path failed: {e}"
                )));
            }
        }
    }
    std::future::pending().await
}

async fn pump_input(
    mut input: BoxedReader,
    mut stdin: BoxedWriter,
    cancel: CancellationToken,
) -> InputEnd {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return InputEnd::Cancelled,
            read = input.read(&mut buffer) => read,
        };
        let n = match read {
            Ok(0) => {
                // Half-close: the remote sees EOF on stdin and its output keeps flowing
                debug!("Inbound input ended after {} bytes, closing remote stdin", total);
                if let Err(e) = stdin.shutdown().await {
                    debug!("Remote stdin shutdown failed: {}", e);
                }
                cancel.cancelled().await;
                return InputEnd::Cancelled;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Inbound read failed after {} bytes: {}", total, e);
                return InputEnd::Broken;
            }
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => return InputEnd::Cancelled,
            written = write_chunk(&mut stdin, &buffer[..n]) => written,
        };
        if let Err(e) = written {
            warn!("Remote stdin write failed after {} bytes: {}", total, e);
            return InputEnd::RemoteGone(e.to_string());
        }
        total += n as u64;
    }
}

async fn write_chunk(writer: &mut BoxedWriter, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

async fn pump_output(
    label: &'static str,
    mut source: BoxedReader,
    sink: OutputSink,
    cancel: CancellationToken,
) -> OutputEnd {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return OutputEnd::Cancelled,
            read = source.read(&mut buffer) => read,
        };
        let n = match read {
            Ok(0) => {
                debug!("Remote {} finished after {} bytes", label, total);
                return OutputEnd::Eof;
            }
            Ok(n) => n,
            Err(e) => {
                return OutputEnd::Failed(StreamError::TransportBroken(format!(
                    "remote {label} read failed: {e}"
                )));
            }
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => return OutputEnd::Cancelled,
            written = sink.write_all(&buffer[..n]) => written,
        };
        if let Err(e) = written {
            debug!("Inbound output closed while forwarding {}: {}", label, e);
            return OutputEnd::SinkClosed;
        }
        total += n as u64;
    }
}
