//! # Loamcheck
//!
//! The reference protocol, a device implementing it, and the scenarios that drive
//! the two against each other.
//!
//! The build script runs `loamgen` over `protocol::test_protocol`, so `bindings` is
//! exactly what a downstream crate would get from its own build script. It also
//! compiles the generated C with a reference firmware, reachable through `firmware`.
//! The `mock_device` binary serves the same handlers over stdio for the process tests.

pub mod device;
pub mod firmware;
pub mod protocol;

/// Generated from `protocol::test_protocol`.
#[allow(dead_code, clippy::all)]
pub mod bindings {
    include!(concat!(env!("OUT_DIR"), "/test_protocol.rs"));
}

pub use device::MockDevice;
