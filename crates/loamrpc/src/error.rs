//! # Error Definitions
//!
//! Failures of protocol declaration and of frame/argument (de)serialization.

use loampack::Error as PackError;

/// Loamrpc schema and wire errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying Loampack codec failed.
    Codec(PackError),
    /// Two signatures in the same namespace share an identifier.
    DuplicateId { namespace: &'static str, id: u16 },
    /// Two signatures share a name.
    DuplicateSignature(String),
    /// Two different struct or enum definitions share a name.
    ConflictingType(String),
    /// Bit-fields may only appear inside structs, not as parameters or returns.
    BitfieldParameter { signature: String, name: String },
    /// Notifications never return a value.
    NotificationReturns(String),
    /// The number of arguments does not match the signature.
    ArgumentCount { signature: String, expected: usize, found: usize },
    /// A void signature was handed a return value or a non-empty payload.
    UnexpectedPayload { signature: String, len: usize },
    /// A non-void signature was handed no return value.
    MissingReturn(String),
    /// The frame is shorter than its header.
    ShortFrame(usize),
    /// The frame kind byte is not recognized.
    UnknownKind(u8),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::DuplicateId { namespace, id } => write!(f, "Duplicate {} id {:#05x}", namespace, id),
            Error::DuplicateSignature(name) => write!(f, "Duplicate signature name {}", name),
            Error::ConflictingType(name) => write!(f, "Conflicting definitions for type {}", name),
            Error::BitfieldParameter { signature, name } => {
                write!(f, "{}: {} is a bit-field, only valid inside a struct", signature, name)
            }
            Error::NotificationReturns(name) => write!(f, "Notification {} declares a return type", name),
            Error::ArgumentCount { signature, expected, found } => {
                write!(f, "{} takes {} arguments, {} given", signature, expected, found)
            }
            Error::UnexpectedPayload { signature, len } => {
                write!(f, "{} returns nothing but carried {} bytes", signature, len)
            }
            Error::MissingReturn(name) => write!(f, "{} must return a value", name),
            Error::ShortFrame(len) => write!(f, "Frame of {} bytes is shorter than its header", len),
            Error::UnknownKind(kind) => write!(f, "Unknown frame kind {:#04x}", kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Codec(e)
    }
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;
