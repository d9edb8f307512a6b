//! # Firmware
//!
//! The generated C bindings and `csrc/firmware.c`, linked in by the build script and
//! driven from Rust. `FirmwareTransport` puts the C dispatcher behind a `Transport`,
//! so a host peer talks to exactly the code a device would run.

use std::ffi::c_int;
use std::fmt;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use loamrun::transport;
use loamrun::transport::Transport;

/// Room for one reply frame, and again for variable-length return values.
pub const FRAME_CAPACITY: usize = 4096;

#[repr(C)]
struct Arena {
    buf: *mut u8,
    cap: usize,
    used: usize,
}

unsafe extern "C" {
    fn test_protocol_process(rx: *mut u8, rx_len: usize, tx: *mut u8, tx_cap: usize, arena: *mut Arena) -> c_int;
    fn firmware_sample(layout: c_int, out: *mut u8, cap: usize) -> c_int;
    fn firmware_repack(layout: c_int, input: *mut u8, len: usize, out: *mut u8, cap: usize) -> c_int;
}

/// A negative status returned by the C side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareError(pub i32);

impl FirmwareError {
    pub const TRUNCATED: Self = Self(-1);
    pub const INVALID_ENUM: Self = Self(-2);
    pub const NO_SPACE: Self = Self(-3);
    pub const TRAILING: Self = Self(-4);
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match *self {
            Self::TRUNCATED => "truncated",
            Self::INVALID_ENUM => "invalid enum value",
            Self::NO_SPACE => "no space",
            Self::TRAILING => "trailing bytes",
            _ => "unknown status",
        };
        write!(f, "Firmware error {}: {}", self.0, what)
    }
}

impl std::error::Error for FirmwareError {}

pub type Result<T> = std::result::Result<T, FirmwareError>;

/// Struct layouts the firmware can build and repack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Bitfields = 0,
    ListFirst = 1,
    ListMid = 2,
    ListLast = 3,
    Date = 4,
    Lfsr = 5,
}

fn status(rc: c_int, mut buf: Vec<u8>) -> Result<Vec<u8>> {
    if rc < 0 {
        return Err(FirmwareError(rc));
    }
    buf.truncate(rc as usize);
    Ok(buf)
}

/// Runs one frame through the C dispatcher. `None` when it has nothing to answer.
pub fn process(frame: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut rx = frame.to_vec();
    let mut tx = vec![0u8; FRAME_CAPACITY];
    let mut scratch = vec![0u8; FRAME_CAPACITY];
    let mut arena = Arena { buf: scratch.as_mut_ptr(), cap: scratch.len(), used: 0 };
    // SAFETY: every pointer comes from a live buffer of the length passed beside it,
    // and the C side neither keeps nor frees them once it returns.
    let rc = unsafe { test_protocol_process(rx.as_mut_ptr(), rx.len(), tx.as_mut_ptr(), tx.len(), &mut arena) };
    let reply = status(rc, tx)?;
    Ok((!reply.is_empty()).then_some(reply))
}

/// The wire bytes of the firmware's built-in sample of `layout`.
pub fn sample(layout: Layout) -> Result<Vec<u8>> {
    let mut out = vec![0u8; FRAME_CAPACITY];
    // SAFETY: `out` is live for the call and `cap` is its length.
    let rc = unsafe { firmware_sample(layout as c_int, out.as_mut_ptr(), out.len()) };
    status(rc, out)
}

/// Decodes `bytes` as `layout` in C and encodes the result again.
pub fn repack(layout: Layout, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut input = bytes.to_vec();
    let mut out = vec![0u8; FRAME_CAPACITY];
    // SAFETY: both buffers are live for the call and passed with their lengths.
    let rc = unsafe { firmware_repack(layout as c_int, input.as_mut_ptr(), input.len(), out.as_mut_ptr(), out.len()) };
    status(rc, out)
}

/// A device end that answers every request with the C firmware, in-process.
pub struct FirmwareTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl FirmwareTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx: Mutex::new(Some(tx)), rx: Mutex::new(rx) }
    }
}

impl Default for FirmwareTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for FirmwareTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(transport::Error::ConnectionLost("Firmware closed".into()));
        };
        match process(frame) {
            Ok(Some(reply)) => tx
                .send(reply)
                .map_err(|_| transport::Error::ConnectionLost("Firmware closed".into())),
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(error = %e, "firmware dropped a frame");
                Ok(())
            }
        }
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> transport::Result<()> {
        self.tx.lock().await.take();
        Ok(())
    }
}
