//! The current process's own stdin/stdout, for device-side binaries launched
//! behind a `ProcessTransport`.

use tokio::io::Stdin;
use tokio::io::Stdout;

use super::Result;
use super::StreamTransport;
use super::Transport;

/// Length-prefixed frames over this process's standard streams.
///
/// Anything else written to stdout corrupts the stream; log to stderr instead.
pub struct StdioTransport {
    inner: StreamTransport<Stdin, Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self { inner: StreamTransport::new(tokio::io::stdin(), tokio::io::stdout()) }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.inner.send(frame).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        self.inner.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
