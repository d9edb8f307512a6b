//! Serial port transport.
//!
//! The port is opened once as a raw 8N1 line without flow control and registered
//! with the reactor, so a pending `recv` is cancelled like any other socket read.
//! `close` wakes that read and releases the device.

use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio_serial::DataBits;
use tokio_serial::FlowControl;
use tokio_serial::Parity;
use tokio_serial::SerialPortBuilderExt;
use tokio_serial::SerialStream;
use tokio_serial::StopBits;

use super::Error;
use super::Result;
use super::Transport;
use super::framing::read_frame;
use super::framing::write_frame;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Length-prefixed frames over a serial line.
pub struct SerialTransport {
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    closing: watch::Sender<bool>,
    path: String,
    baud: u32,
}

impl SerialTransport {
    /// Opens `path` at `baud` bits per second.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        if baud == 0 {
            return Err(Error::InvalidConfig(format!("unsupported baud rate {}", baud)));
        }
        let port = tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::Unavailable(format!("serial {}: {}", path, e)))?;
        Ok(Self::from_stream(port, path, baud))
    }

    /// Wraps an already opened port, such as one end of a pseudo-terminal pair.
    pub fn from_stream(port: SerialStream, path: &str, baud: u32) -> Self {
        let (reader, writer) = tokio::io::split(port);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closing: watch::channel(false).0,
            path: path.to_string(),
            baud,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionLost(format!("serial {} closed", self.path))
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(port) => write_frame(port, frame).await,
            None => Err(self.closed_error()),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut closing = self.closing.subscribe();
        let mut reader = self.reader.lock().await;
        let Some(port) = reader.as_mut() else {
            return Ok(None);
        };
        tokio::select! {
            frame = read_frame(port) => frame,
            _ = closing.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closing.send_replace(true);
        let writer = self.writer.lock().await.take();
        if let Some(mut port) = writer {
            // The line may already be gone, the device is released either way.
            let _ = port.shutdown().await;
        }
        self.reader.lock().await.take();
        Ok(())
    }
}
