/// SSH session channel as an inbound terminal connection
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::inbound::{ConnectionResult, InboundConnection, InboundStreams};

const BUFFER_SIZE: usize = 4096;
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One SSH `session` channel that asked for a shell
pub struct SshConnection {
    id: String,
    principal: String,
    channel: ChannelId,
    handle: Handle,
    streams: Option<InboundStreams>,
    input_task: Option<JoinHandle<()>>,
    output_task: Option<JoinHandle<u64>>,
    closed: bool,
}

impl SshConnection {
    /// `output` is the read end of the pipe behind `streams.output`
    pub fn new(
        id: String,
        principal: String,
        channel: ChannelId,
        handle: Handle,
        streams: InboundStreams,
        input_task: JoinHandle<()>,
        output: DuplexStream,
    ) -> Self {
        let output_task = tokio::spawn(forward_output(output, handle.clone(), channel));
        Self {
            id,
            principal,
            channel,
            handle,
            streams: Some(streams),
            input_task: Some(input_task),
            output_task: Some(output_task),
            closed: false,
        }
    }
}

impl fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnection")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("channel", &self.channel)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl InboundConnection for SshConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn principal(&self) -> &str {
        &self.principal
    }

    fn take_streams(&mut self) -> Option<InboundStreams> {
        self.streams.take()
    }

    async fn close(&mut self, exit_status: u32) -> ConnectionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Untaken streams still hold the output pipe open
        drop(self.streams.take());
        if let Some(mut task) = self.output_task.take() {
            match tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, &mut task).await {
                Ok(Ok(sent)) => debug!("Session {}: {} bytes sent to client", self.id, sent),
                Ok(Err(e)) => debug!("Session {}: output forwarder failed: {}", self.id, e),
                Err(_) => {
                    debug!("Session {}: client stopped reading, dropping output", self.id);
                    task.abort();
                }
            }
        }
        if let Some(task) = self.input_task.take() {
            task.abort();
        }

        // The client may already be gone, in which case none of these can be delivered
        if self
            .handle
            .exit_status_request(self.channel, exit_status)
            .await
            .is_err()
        {
            debug!("Session {}: exit status not delivered", self.id);
        }
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
        Ok(())
    }
}

/// Copy client keystrokes from the SSH channel into the inbound pipe.
///
/// Channel EOF closes the pipe and nothing more; `hangup` fires only once the
/// channel itself is closed or gone.
pub(crate) async fn pump_channel_input(
    mut channel: Channel<Msg>,
    input: DuplexStream,
    hangup: CancellationToken,
) {
    let mut input = Some(input);
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                let Some(pipe) = input.as_mut() else {
                    continue;
                };
                if pipe.write_all(&data).await.is_err() {
                    break;
                }
            }
            ChannelMsg::Eof => {
                if let Some(mut pipe) = input.take() {
                    let _ = pipe.shutdown().await;
                }
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    if let Some(mut pipe) = input.take() {
        let _ = pipe.shutdown().await;
    }
    hangup.cancel();
}

/// Copy gateway output onto the SSH channel until the pipe closes
async fn forward_output(mut output: DuplexStream, handle: Handle, channel: ChannelId) -> u64 {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match output.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if handle
            .data(channel, CryptoVec::from_slice(&buffer[..n]))
            .await
            .is_err()
        {
            break;
        }
        total += n as u64;
    }
    total
}
