//! TCP client transport.

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;

use super::Error;
use super::Result;
use super::StreamTransport;
use super::Transport;

/// Length-prefixed frames over a TCP connection.
pub struct TcpTransport {
    inner: StreamTransport<OwnedReadHalf, OwnedWriteHalf>,
    peer: String,
}

impl TcpTransport {
    /// Connects to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Unavailable(format!("tcp {}: {}", addr, e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already connected stream, such as one returned by `accept`.
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let (reader, writer) = stream.into_split();
        Self { inner: StreamTransport::new(reader, writer), peer }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
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
