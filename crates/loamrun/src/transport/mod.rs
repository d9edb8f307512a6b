//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole frames between endpoints.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: A transport hands out complete frames. How a frame boundary is
//!   found inside a byte stream is the transport's business, never the runtime's.
//! - **Opaque**: Transports know nothing about headers, signatures or values.
//! - **Fail Early**: Constructors connect eagerly and report `Unavailable` right away.
//!
//! Stream transports (TCP, serial, child process, stdio) prefix every frame with its
//! length as a little-endian `u16`. UDP maps one datagram to one frame.

mod channel;
pub mod framing;
mod process;
mod serial;
mod stdio;
mod tcp;
mod udp;

use std::fmt;

pub use channel::ChannelTransport;
pub use framing::StreamTransport;
pub use framing::MAX_FRAME_LEN;
pub use process::ProcessTransport;
pub use serial::SerialTransport;
pub use serial::DEFAULT_BAUD_RATE;
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport could not be constructed: refused, absent or exited.
    Unavailable(String),
    /// The other end went away or the stream was cut mid-frame.
    ConnectionLost(String),
    /// The frame does not fit the length prefix.
    FrameTooLarge(usize),
    /// A connection string could not be understood.
    InvalidConfig(String),
    /// Generic I/O failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Transport unavailable: {}", msg),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::FrameTooLarge(len) => write!(f, "Frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
            Self::InvalidConfig(msg) => write!(f, "Invalid transport config: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duplex channel of whole frames.
///
/// Object safe, so runtimes hold a `Box<dyn Transport>` and never learn which
/// medium sits underneath.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Waits for the next frame. `Ok(None)` means the other end closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Releases the underlying resource. Later sends fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
