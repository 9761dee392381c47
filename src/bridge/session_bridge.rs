/// Session bridge: one inbound terminal spliced to one remote exec stream
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeError, FailureReason, Session, SessionState};
use crate::config::GatewayConfig;
use crate::exec::{self, Attachment, ExecClient, ExecConfig, StreamEnd, TerminalControl};
use crate::inbound::{ConnectionError, InboundConnection, InboundStreams, OutputSink, ResizeFeed};
use crate::resolver::{Target, WorkloadResolver};

/// Exit status reported to the client when the session did not end with a remote exit code
pub const FAILURE_EXIT_STATUS: u32 = 1;

/// Immutable per-process settings shared by every bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub resolver: WorkloadResolver,
    pub exec: ExecConfig,
    /// First line shown to the client; empty to disable
    pub banner: String,
}

impl BridgeSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            resolver: WorkloadResolver::from_config(config),
            exec: ExecConfig {
                attach: Attachment::interactive(),
                dial_timeout: config.dial_timeout(),
                drain_timeout: config.drain_timeout(),
            },
            banner: config.banner.clone(),
        }
    }
}

/// Summary of a session that reached `Closed`
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub target: Target,
    pub end: StreamEnd,
    pub exit_status: u32,
    pub duration: Duration,
}

/// Owns one session from resolution to teardown.
///
/// Both handles are released on every exit path: the exec stream is closed
/// exactly once after streaming ends, and the inbound connection is closed
/// exactly once before `start` returns.
pub struct SessionBridge<C: InboundConnection> {
    session: Session,
    inbound: C,
    exec: Arc<dyn ExecClient>,
    settings: Arc<BridgeSettings>,
    teardown: CancellationToken,
}

impl<C: InboundConnection> SessionBridge<C> {
    pub fn new(inbound: C, exec: Arc<dyn ExecClient>, settings: Arc<BridgeSettings>) -> Self {
        let session = Session::new(inbound.id().to_string(), inbound.principal().to_string());
        Self {
            session,
            inbound,
            exec,
            settings,
            teardown: CancellationToken::new(),
        }
    }

    /// Tie the session to an outer token, e.g. gateway shutdown
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.teardown = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Run the session to completion. May only be called once.
    ///
    /// Errors are shown to the client as a final line; logging them is the
    /// caller's job.
    pub async fn start(&mut self) -> Result<SessionOutcome, BridgeError> {
        self.session.transition(SessionState::Resolving)?;

        let Some(streams) = self.inbound.take_streams() else {
            warn!("Session {}: inbound streams unavailable", self.session.id);
            if let Err(e) = self.inbound.close(FAILURE_EXIT_STATUS).await {
                debug!("Session {}: close failed: {}", self.session.id, e);
            }
            self.session
                .transition(SessionState::Failed(FailureReason::Inbound))?;
            return Err(ConnectionError::StreamsTaken.into());
        };
        let InboundStreams {
            input,
            output,
            resize,
            hangup,
        } = streams;

        info!(
            "Session {} started for principal {:?}",
            self.session.id, self.session.principal
        );
        if !self.settings.banner.is_empty() {
            if let Err(e) = output.write_line(&self.settings.banner).await {
                debug!("Session {}: banner not delivered: {}", self.session.id, e);
            }
        }

        let target = match self.settings.resolver.resolve(&self.session.principal) {
            Ok(target) => target,
            Err(e) => return self.fail(FailureReason::Resolution, e.into(), &output).await,
        };
        self.session.target = Some(target.clone());
        self.session.transition(SessionState::Dialing)?;

        let mut handle = match exec::dial(self.exec.as_ref(), &target, &self.settings.exec).await {
            Ok(handle) => handle,
            Err(e) => return self.fail(FailureReason::Dial, e.into(), &output).await,
        };
        self.session.transition(SessionState::Streaming)?;

        let resize_path = handle.take_control().map(|control| {
            tokio::spawn(forward_resizes(
                resize,
                control,
                self.teardown.child_token(),
                self.session.id.clone(),
            ))
        });

        let streamed = handle
            .stream(input, output.clone(), output.clone(), &hangup, &self.teardown)
            .await;

        // Unconditional from here on: cancel what is left, then release the exec stream.
        self.teardown.cancel();
        if let Some(task) = resize_path {
            if let Err(e) = task.await {
                warn!("Session {}: resize path failed: {}", self.session.id, e);
            }
        }
        handle.close().await;

        let end = match streamed {
            Ok(end) => end,
            Err(e) => return self.fail(FailureReason::Stream, e.into(), &output).await,
        };
        self.session.transition(SessionState::Closing)?;

        let exit_status = match &end {
            StreamEnd::RemoteExited(exit) => exit.exit_status(),
            StreamEnd::InboundClosed => 0,
            StreamEnd::Cancelled => {
                if let Err(e) = output.write_line("Session terminated by the gateway").await {
                    debug!("Session {}: notice not delivered: {}", self.session.id, e);
                }
                FAILURE_EXIT_STATUS
            }
        };
        self.release_inbound(&output, exit_status).await;
        self.session.transition(SessionState::Closed)?;

        info!(
            "Session {} closed after {:?}: {:?}",
            self.session.id,
            self.session.age(),
            end
        );
        Ok(SessionOutcome {
            session_id: self.session.id.clone(),
            target,
            end,
            exit_status,
            duration: self.session.age(),
        })
    }

    async fn fail(
        &mut self,
        reason: FailureReason,
        error: BridgeError,
        output: &OutputSink,
    ) -> Result<SessionOutcome, BridgeError> {
        debug!(
            "Session {} failed while {:?} for target {:?}",
            self.session.id,
            self.session.state(),
            self.session.target
        );
        if let Err(e) = output.write_line(&format!("Error: {error}")).await {
            debug!("Session {}: error line not delivered: {}", self.session.id, e);
        }
        self.release_inbound(output, FAILURE_EXIT_STATUS).await;
        self.session.transition(SessionState::Failed(reason))?;
        Err(error)
    }

    async fn release_inbound(&mut self, output: &OutputSink, exit_status: u32) {
        if let Err(e) = output.shutdown().await {
            debug!("Session {}: output shutdown failed: {}", self.session.id, e);
        }
        if let Err(e) = self.inbound.close(exit_status).await {
            debug!("Session {}: close failed: {}", self.session.id, e);
        }
    }
}

/// Forward terminal geometry to the exec control channel.
///
/// Only the latest size is kept, so a burst of resizes while the remote is
/// slow collapses to its final value. Runs until cancelled or the feed ends.
async fn forward_resizes(
    mut resize: ResizeFeed,
    mut control: Box<dyn TerminalControl>,
    cancel: CancellationToken,
    session_id: String,
) {
    loop {
        let latest = *resize.borrow_and_update();
        if let Some(size) = latest {
            let sent = tokio::select! {
                _ = cancel.cancelled() => return,
                sent = control.resize(size) => sent,
            };
            match sent {
                Ok(()) => debug!("Session {}: resized to {}x{}", session_id, size.cols, size.rows),
                Err(e) => {
                    warn!("Session {}: resize failed: {}", session_id, e);
                    return;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = resize.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
