/// In-memory inbound connection for tests
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{DuplexStream, duplex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::inbound::{
    ConnectionResult, InboundConnection, InboundStreams, OutputSink, ResizeEvent,
};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct MemoryConnection {
    id: String,
    principal: String,
    streams: Option<InboundStreams>,
    closes: Arc<AtomicUsize>,
    exit_statuses: Arc<Mutex<Vec<u32>>>,
}

/// The user's end of a [`MemoryConnection`]
#[derive(Debug)]
pub struct MemoryClient {
    /// Type here; drop for a half-close
    pub input: DuplexStream,
    /// Read what the gateway shows
    pub output: DuplexStream,
    pub resize: watch::Sender<Option<ResizeEvent>>,
    /// Cancel to disconnect
    pub hangup: CancellationToken,
    pub closes: Arc<AtomicUsize>,
    pub exit_statuses: Arc<Mutex<Vec<u32>>>,
}

pub fn memory_connection(principal: &str) -> (MemoryConnection, MemoryClient) {
    let (client_input, gateway_input) = duplex(PIPE_CAPACITY);
    let (gateway_output, client_output) = duplex(PIPE_CAPACITY);
    let (resize_tx, resize_rx) = watch::channel(None);
    let hangup = CancellationToken::new();
    let closes = Arc::new(AtomicUsize::new(0));
    let exit_statuses = Arc::new(Mutex::new(Vec::new()));

    let connection = MemoryConnection {
        id: format!("memory-{principal}"),
        principal: principal.to_string(),
        streams: Some(InboundStreams {
            input: Box::new(gateway_input),
            output: OutputSink::new(gateway_output),
            resize: resize_rx,
            hangup: hangup.clone(),
        }),
        closes: closes.clone(),
        exit_statuses: exit_statuses.clone(),
    };
    let client = MemoryClient {
        input: client_input,
        output: client_output,
        resize: resize_tx,
        hangup,
        closes,
        exit_statuses,
    };
    (connection, client)
}

#[async_trait::async_trait]
impl InboundConnection for MemoryConnection {
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
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut statuses) = self.exit_statuses.lock() {
            statuses.push(exit_status);
        }
        Ok(())
    }
}
