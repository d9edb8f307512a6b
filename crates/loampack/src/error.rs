//! # Error Definitions
//!
//! Codec failures are local to a single encode/decode call. Schema failures are
//! reported when a type is built and never reach the wire.

/// Loampack schema, serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ------------------------------------------------------------------------
    //  Decoding
    // ------------------------------------------------------------------------
    /// The buffer ended before the type was complete, or a derived length does not
    /// divide into whole list elements.
    TruncatedMessage { needed: usize, available: usize },
    /// A complete value was decoded but bytes were left over.
    TrailingBytes { consumed: usize, available: usize },
    /// The backing integer matches no declared constant of the enum.
    InvalidEnumValue { name: String, value: i64 },
    /// String data is not valid UTF-8.
    InvalidUtf8,

    // ------------------------------------------------------------------------
    //  Encoding
    // ------------------------------------------------------------------------
    /// The value does not have the shape of the type it is encoded as.
    TypeMismatch { expected: String, found: String },
    /// A bit-field value does not fit its declared width.
    ValueOutOfRange { ty: String, value: u64 },
    /// The constant name is not declared by the enum.
    UnknownEnumConstant { name: String, constant: String },
    /// A struct value is missing a member, or lists members out of declaration order.
    MissingField { name: String },

    // ------------------------------------------------------------------------
    //  Schema
    // ------------------------------------------------------------------------
    /// Bit-field width outside `1..=MAX_BIT_WIDTH`.
    InvalidBitWidth(u32),
    /// A struct (or parameter list) declares more than one variable-length member.
    MultipleVariableMembers { name: String },
    /// Two members, constants or signatures share a name within one scope.
    DuplicateName { scope: String, name: String },
    /// List elements must be fixed-size and byte aligned.
    InvalidListElement(String),
    /// Enums must be backed by an integer primitive or a bit-field.
    InvalidEnumBacking { name: String },
    /// A constant does not fit the enum's backing type.
    EnumValueOutOfRange { name: String, constant: String, value: i64 },
    /// Structs and enums must declare at least one member.
    Empty(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TruncatedMessage { needed, available } => {
                write!(f, "Truncated message: needed {} bytes, {} available", needed, available)
            }
            Error::TrailingBytes { consumed, available } => {
                write!(f, "Trailing bytes: consumed {} of {} bytes", consumed, available)
            }
            Error::InvalidEnumValue { name, value } => {
                write!(f, "Invalid value {} for enum {}", value, name)
            }
            Error::InvalidUtf8 => write!(f, "String data is not valid UTF-8"),
            Error::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Error::ValueOutOfRange { ty, value } => write!(f, "Value {} does not fit {}", value, ty),
            Error::UnknownEnumConstant { name, constant } => {
                write!(f, "Enum {} has no constant named {}", name, constant)
            }
            Error::MissingField { name } => write!(f, "Missing or misplaced field: {}", name),
            Error::InvalidBitWidth(w) => write!(f, "Invalid bit-field width: {}", w),
            Error::MultipleVariableMembers { name } => {
                write!(f, "{} declares more than one variable-length member", name)
            }
            Error::DuplicateName { scope, name } => write!(f, "Duplicate name {} in {}", name, scope),
            Error::InvalidListElement(ty) => write!(f, "Invalid list element type: {}", ty),
            Error::InvalidEnumBacking { name } => write!(f, "Enum {} has an invalid backing type", name),
            Error::EnumValueOutOfRange { name, constant, value } => {
                write!(f, "Constant {}::{} = {} does not fit the backing type", name, constant, value)
            }
            Error::Empty(name) => write!(f, "{} declares no members", name),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Loampack operations.
pub type Result<T> = std::result::Result<T, Error>;
