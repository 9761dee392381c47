/// In-memory exec backend for tests.
///
/// Every successful `open` hands the test a [`MockRemote`] holding the
/// container side of each stream.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::exec::{
    DialError, ExecClient, ExecRequest, ExecStreams, RemoteExit, RemoteProcess, StreamError,
    TerminalControl,
};
use crate::inbound::ResizeEvent;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Container side of one mock exec stream
#[derive(Debug)]
pub struct MockRemote {
    pub request: ExecRequest,
    /// Read what the gateway wrote to the command's stdin
    pub stdin: DuplexStream,
    /// Write command output
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
    /// Report the command's exit
    pub exit: oneshot::Sender<Result<RemoteExit, StreamError>>,
}

#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    pub opens: Arc<AtomicUsize>,
    pub aborts: Arc<AtomicUsize>,
    pub resizes: Arc<Mutex<Vec<ResizeEvent>>>,
}

#[derive(Debug)]
pub struct MockExecClient {
    remotes: Option<mpsc::UnboundedSender<MockRemote>>,
    failure: Option<DialError>,
    open_delay: Option<Duration>,
    resize_delay: Duration,
    pub counters: MockCounters,
}

impl MockExecClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            remotes: Some(tx),
            failure: None,
            open_delay: None,
            resize_delay: Duration::ZERO,
            counters: MockCounters::default(),
        };
        (client, rx)
    }

    /// Every dial fails with `error`
    pub fn failing(error: DialError) -> Self {
        Self {
            remotes: None,
            failure: Some(error),
            open_delay: None,
            resize_delay: Duration::ZERO,
            counters: MockCounters::default(),
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Make every resize take `delay` to apply
    pub fn with_resize_delay(mut self, delay: Duration) -> Self {
        self.resize_delay = delay;
        self
    }
}

#[async_trait]
impl ExecClient for MockExecClient {
    async fn open(&self, request: &ExecRequest) -> Result<ExecStreams, DialError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let (stdin_gateway, stdin_remote) = duplex(PIPE_CAPACITY);
        let (stdout_remote, stdout_gateway) = duplex(PIPE_CAPACITY);
        let (stderr_remote, stderr_gateway) = duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        let remote = MockRemote {
            request: request.clone(),
            stdin: stdin_remote,
            stdout: stdout_remote,
            stderr: stderr_remote,
            exit: exit_tx,
        };
        if let Some(remotes) = &self.remotes {
            remotes
                .send(remote)
                .map_err(|_| DialError::TransportSetupFailure("mock remote dropped".into()))?;
        }
        debug!("Mock exec opened for {}/{}", request.namespace, request.workload_id);

        Ok(ExecStreams {
            stdin: Box::new(stdin_gateway),
            stdout: Box::new(stdout_gateway),
            stderr: Some(Box::new(stderr_gateway)),
            control: Some(Box::new(MockControl {
                resizes: self.counters.resizes.clone(),
                delay: self.resize_delay,
            })),
            process: Box::new(MockProcess {
                exit: exit_rx,
                aborts: self.counters.aborts.clone(),
            }),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockProcess {
    exit: oneshot::Receiver<Result<RemoteExit, StreamError>>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteProcess for MockProcess {
    async fn wait(&mut self) -> Result<RemoteExit, StreamError> {
        match (&mut self.exit).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::RemoteClosed("mock remote dropped".into())),
        }
    }

    async fn abort(&mut self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.exit.close();
    }
}

struct MockControl {
    resizes: Arc<Mutex<Vec<ResizeEvent>>>,
    delay: Duration,
}

#[async_trait]
impl TerminalControl for MockControl {
    async fn resize(&mut self, size: ResizeEvent) -> Result<(), StreamError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.resizes
            .lock()
            .map_err(|_| StreamError::ProtocolViolation("resize log poisoned".into()))?
            .push(size);
        Ok(())
    }
}
