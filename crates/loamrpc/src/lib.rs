//! # Loamrpc
//!
//! Protocol declarations and the frame envelope for talking to small devices.
//!
//! ## Architecture
//!
//! A `Protocol` is declared once through `Protocol::builder` and frozen. Each `Signature`
//! knows how to turn an argument list into a payload and back, using the parameter tuple
//! as an anonymous `loampack` struct. `frame` wraps payloads with the 4-byte header the
//! runtime uses to route requests, responses and notifications.

mod error;
pub mod frame;
mod protocol;
mod signature;


pub use error::Error;
pub use error::Result;
pub use frame::Frame;
pub use frame::FrameKind;
pub use frame::Header;
pub use protocol::Protocol;
pub use protocol::ProtocolBuilder;
pub use signature::Direction;
pub use signature::Kind;
pub use signature::Role;
pub use signature::Signature;
pub use signature::SignatureBuilder;
