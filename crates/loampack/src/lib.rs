//! # Loampack
//!
//! A schema-driven binary codec for talking to small devices.
//!
//! ## Philosophy
//!
//! - **Schema First**: Bytes carry no tags. The receiver must know the `Type` it is decoding,
//!   exactly like a C struct overlaid on a buffer, minus the alignment padding.
//! - **Derived Lengths**: A struct may hold at most one variable-length member. Its size is
//!   never written; it is whatever the enclosing message has left over.
//! - **Bit Runs**: Consecutive bit-field members share bytes, LSB first, with no padding
//!   except at the very end of the run.
//!
//! ## Format
//!
//! - **Scalars**: natural width, Little-Endian (`F32` is IEEE-754).
//! - **Enums**: their backing type.
//! - **Strings / Bytes / Lists**: raw payload, length derived from the enclosing span.
//! - **Structs**: members in declaration order, bit runs rounded up to whole bytes.
//!
//! The dynamic codec (`encode`/`decode` over `Value`) and the `Pack` trait used by
//! generated bindings must agree byte for byte.

mod bits;
mod decode;
mod encode;
mod error;
mod pack;
mod types;
mod value;

#[cfg(test)]
mod tests;

pub use bits::BitReader;
pub use bits::BitWriter;
pub use decode::decode;
pub use decode::decode_exact;
pub use encode::encode;
pub use encode::encode_into;
pub use error::Error;
pub use error::Result;
pub use pack::derived_len;
pub use pack::window;
pub use pack::Pack;
pub use types::EnumBuilder;
pub use types::EnumType;
pub use types::Field;
pub use types::Segment;
pub use types::StructBuilder;
pub use types::StructType;
pub use types::Type;
pub use types::MAX_BIT_WIDTH;
pub use value::Value;
