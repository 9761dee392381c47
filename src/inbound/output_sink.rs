use std::fmt::{self, Debug};
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::exec::BoxedWriter;

/// Shared writer for everything shown to the inbound client.
///
/// Remote stdout, remote stderr and status lines all go through one sink, so
/// each write lands whole and in the order it was issued.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

impl OutputSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "output sink shut down"))?;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Write `line` followed by CRLF, as a tty client expects
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut framed = Vec::with_capacity(line.len() + 2);
        framed.extend_from_slice(line.as_bytes());
        framed.extend_from_slice(b"\r\n");
        self.write_all(&framed).await
    }

    /// Flush and close the writer. Later writes fail with `BrokenPipe`.
    pub async fn shutdown(&self) -> io::Result<()> {
        let writer = self.inner.lock().await.take();
        match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn lines_are_crlf_terminated_and_shutdown_is_idempotent() {
        let (writer, mut reader) = duplex(1024);
        let sink = OutputSink::new(writer);

        sink.write_line("Welcome!").await.unwrap();
        sink.clone().write_all(b"$ ").await.unwrap();
        sink.shutdown().await.unwrap();
        sink.shutdown().await.unwrap();

        let err = sink.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let mut shown = String::new();
        reader.read_to_string(&mut shown).await.unwrap();
        assert_eq!(shown, "Welcome!\r\n$ ");
    }
}
