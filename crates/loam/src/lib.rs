//! # Loam
//!
//! One import for the whole stack.
//!
//! - `pack`: type model and binary codec.
//! - `rpc`: signatures, protocols and frame headers.
//! - `codegen`: C and Rust code generation.
//! - `run`: transports and the call/notification runtime.

pub use loamgen as codegen;
pub use loampack as pack;
pub use loamrpc as rpc;
pub use loamrun as run;

pub use loampack::Type;
pub use loampack::Value;
pub use loamrpc::Direction;
pub use loamrpc::Protocol;
pub use loamrpc::Role;
pub use loamrpc::Signature;
pub use loamrun::Peer;
pub use loamrun::PeerConfig;
pub use loamrun::TransportConfig;
