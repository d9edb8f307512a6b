//! # Loamrun
//!
//! Transports and the runtime that drives a protocol over them.
//!
//! ## Architecture
//!
//! A `Peer` owns one `Transport` and a background pump. Callers issue calls and
//! notifications from any task; the pump routes everything that comes back. The same
//! type plays either end of a link: a host calls and subscribes, a device serves calls
//! and posts notifications. `blocking::BlockingPeer` wraps a peer for plain threads and
//! `proxy::TcpProxy` shares one device link with a remote tool.

pub mod blocking;
pub mod config;
pub mod peer;
pub mod proxy;
pub mod transport;


pub use blocking::BlockingPeer;
pub use config::PeerConfig;
pub use config::TransportConfig;
pub use peer::Peer;
pub use peer::PeerHandle;
pub use peer::RemoteFailure;
pub use peer::Subscription;
pub use proxy::TcpProxy;
pub use transport::Transport;
