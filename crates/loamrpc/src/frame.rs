//! # Protocol Frames
//!
//! Every frame is a 4-byte header followed by a payload:
//!
//! ```text
//! [kind: u8][txn: u8][id: u16 LE][payload ...]
//! ```
//!
//! ## Invariants
//! - **Panic Safety**: Decoding never panics on unknown or short input.
//! - **Correlation**: Responses echo the `txn` of their request. Notifications carry `0`.

use crate::error::Error;
use crate::error::Result;

/// Bytes taken by the header.
pub const HEADER_LEN: usize = 4;

/// `txn` of frames that are not part of a request/response exchange.
pub const NO_TXN: u8 = 0;

/// Discriminates the frame types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Request = 1,
    Response = 2,
    Notification = 3,
    /// The device failed while handling the request. Payload is an optional UTF-8 reason.
    Error = 4,
    /// The device has no handler for the identifier. Empty payload.
    Unsupported = 5,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            3 => Some(FrameKind::Notification),
            4 => Some(FrameKind::Error),
            5 => Some(FrameKind::Unsupported),
            _ => None,
        }
    }

    /// True for the kinds that answer a request.
    pub fn is_reply(self) -> bool {
        matches!(self, FrameKind::Response | FrameKind::Error | FrameKind::Unsupported)
    }
}

/// The fixed frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub kind: FrameKind,
    pub txn: u8,
    pub id: u16,
}

impl Header {
    pub fn request(id: u16, txn: u8) -> Self {
        Self { kind: FrameKind::Request, txn, id }
    }

    pub fn notification(id: u16) -> Self {
        Self { kind: FrameKind::Notification, txn: NO_TXN, id }
    }

    /// A reply of `kind` to this request header.
    pub fn reply(&self, kind: FrameKind) -> Self {
        Self { kind, txn: self.txn, id: self.id }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind as u8);
        buf.push(self.txn);
        buf.extend_from_slice(&self.id.to_le_bytes());
    }
}

/// A decoded frame borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(header: Header, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    /// Splits raw frame bytes into header and payload.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::ShortFrame(bytes.len()));
        }
        let kind = FrameKind::from_u8(bytes[0]).ok_or(Error::UnknownKind(bytes[0]))?;
        let header = Header {
            kind,
            txn: bytes[1],
            id: u16::from_le_bytes([bytes[2], bytes[3]]),
        };
        Ok(Self { header, payload: &bytes[HEADER_LEN..] })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(self.payload);
        buf
    }
}

/// Encodes a frame in one step.
pub fn encode_frame(header: Header, payload: &[u8]) -> Vec<u8> {
    Frame::new(header, payload).encode()
}
