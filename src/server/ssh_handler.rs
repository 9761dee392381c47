/// russh handler: turns SSH channel requests into gateway sessions
use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::PublicKey;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::bridge::SessionBridge;
use crate::inbound::{InboundConnection, InboundStreams, OutputSink, ResizeEvent};
use crate::server::GatewayError;
use crate::server::ssh_connection::{SshConnection, pump_channel_input};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A session channel that has not asked for a shell yet
struct PendingChannel {
    input: DuplexStream,
    input_task: JoinHandle<()>,
    resize: watch::Receiver<Option<ResizeEvent>>,
    hangup: CancellationToken,
}

/// Channel state kept for the lifetime of the SSH connection
struct ChannelState {
    resize: watch::Sender<Option<ResizeEvent>>,
    pending: Option<PendingChannel>,
}

/// Per-connection SSH handler
pub struct SshHandler {
    state: AppState,
    peer: Option<SocketAddr>,
    principal: Option<String>,
    channels: HashMap<ChannelId, ChannelState>,
}

impl SshHandler {
    pub fn new(state: AppState, peer: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer,
            principal: None,
            channels: HashMap::new(),
        }
    }

    // 不做认证：用户名只用来选择目标容器
    fn accept(&mut self, user: &str, method: &str) -> Auth {
        info!(
            "Accepted {} login for {:?} from {:?}",
            method, user, self.peer
        );
        self.principal = Some(user.to_string());
        Auth::Accept
    }

    fn start_session(&mut self, channel: ChannelId, session: &mut Session) -> bool {
        let Some(pending) = self
            .channels
            .get_mut(&channel)
            .and_then(|state| state.pending.take())
        else {
            warn!("Channel {:?} already runs a session", channel);
            return false;
        };

        let session_id = Uuid::new_v4().to_string();
        let principal = self.principal.clone().unwrap_or_default();
        let (output_writer, output_reader) = duplex(PIPE_CAPACITY);
        let streams = InboundStreams {
            input: Box::new(pending.input),
            output: OutputSink::new(output_writer),
            resize: pending.resize,
            hangup: pending.hangup,
        };
        let connection = SshConnection::new(
            session_id,
            principal,
            channel,
            session.handle(),
            streams,
            pending.input_task,
            output_reader,
        );
        self.state
            .spawn_session(run_session(self.state.clone(), connection));
        true
    }
}

/// Drive one bridge to completion and report how it ended
async fn run_session(state: AppState, connection: SshConnection) {
    let session_id = connection.id().to_string();

    let mut bridge = SessionBridge::new(connection, state.exec.clone(), state.bridge.clone())
        .with_cancellation(state.shutdown.child_token());
    match bridge.start().await {
        Ok(outcome) => info!(
            "Session {} to {} ended with status {} after {:?}",
            outcome.session_id, outcome.target, outcome.exit_status, outcome.duration
        ),
        Err(e) => warn!(
            "Session {} failed ({:?}): {}",
            session_id,
            bridge.state(),
            e
        ),
    }
}

#[async_trait]
impl Handler for SshHandler {
    type Error = GatewayError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "none"))
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "password"))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "publickey"))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let (input_writer, input) = duplex(PIPE_CAPACITY);
        let hangup = CancellationToken::new();
        let input_task = tokio::spawn(pump_channel_input(channel, input_writer, hangup.clone()));
        let (resize_tx, resize_rx) = watch::channel(None);

        debug!("Session channel {:?} opened by {:?}", id, self.peer);
        self.channels.insert(
            id,
            ChannelState {
                resize: resize_tx,
                pending: Some(PendingChannel {
                    input,
                    input_task,
                    resize: resize_rx,
                    hangup,
                }),
            },
        );
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("PTY {} {}x{} requested on {:?}", term, col_width, row_height, channel);
        if let Some(state) = self.channels.get(&channel) {
            state
                .resize
                .send_replace(Some(ResizeEvent::from_ssh(col_width, row_height)));
        }
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            state
                .resize
                .send_replace(Some(ResizeEvent::from_ssh(col_width, row_height)));
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.start_session(channel, session) {
            let _ = session.channel_success(channel);
        } else {
            let _ = session.channel_failure(channel);
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        info!(
            "Ignoring requested command {:?}, starting the configured shell",
            String::from_utf8_lossy(data)
        );
        self.shell_request(channel, session).await
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Session channel {:?} closed", channel);
        self.channels.remove(&channel);
        Ok(())
    }
}
