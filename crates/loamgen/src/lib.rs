//! # Loamgen
//!
//! Turns a validated `Protocol` into source code for both ends of a link.
//!
//! ## Philosophy
//!
//! - **Pure Transform**: A target maps a protocol to file contents. No transport, no
//!   process, no file system until `write_all`.
//! - **Deterministic**: The same protocol always yields the same bytes. Signatures are
//!   emitted by identifier, types in declaration order.
//! - **One Wire Format**: Every target implements the layout of `loampack`: little-endian
//!   scalars, LSB-first bit runs, derived lengths. Generated encoders of different
//!   targets agree byte for byte.
//!
//! ## Targets
//!
//! - `CTarget`: header and source for the embedded device. Structs, enums, pack/unpack
//!   routines, a `<proto>_process` request dispatcher, notification store routines and
//!   the prototypes of the handlers the firmware implements.
//! - `RustTarget`: typed structs with `loampack::Pack` impls, a `Client` over
//!   `loamrun::Peer`, and a `Handlers` trait with `dispatch`/`serve` for device-side peers.

mod c;
mod emit;
mod error;
pub mod naming;
mod output;
mod rust;


use std::path::Path;
use std::path::PathBuf;

use loamrpc::Protocol;

pub use c::CTarget;
pub use error::Error;
pub use error::Result;
pub use output::is_generated;
pub use output::write_all;
pub use output::OutputOptions;
pub use output::WriteOutcome;
pub use output::BANNER;
pub use rust::RustTarget;

/// One generated file, named relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub contents: String,
}

impl GeneratedFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self { name: name.into(), contents: contents.into() }
    }
}

/// A language the generator can emit.
pub trait Target {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Produces every file of this target for `protocol`.
    fn generate(&self, protocol: &Protocol) -> Vec<GeneratedFile>;
}

/// Runs a set of targets over one protocol.
pub struct Generator<'a> {
    protocol: &'a Protocol,
    targets: Vec<Box<dyn Target>>,
}

impl<'a> Generator<'a> {
    pub fn new(protocol: &'a Protocol) -> Self {
        Self { protocol, targets: Vec::new() }
    }

    pub fn target(mut self, target: impl Target + 'static) -> Self {
        self.targets.push(Box::new(target));
        self
    }

    /// Files of every target, in the order the targets were added.
    pub fn generate(&self) -> Vec<GeneratedFile> {
        self.targets
            .iter()
            .flat_map(|target| {
                tracing::debug!(target = target.name(), protocol = self.protocol.name(), "generating");
                target.generate(self.protocol)
            })
            .collect()
    }

    /// Generates and writes into `dir`, leaving unchanged files untouched.
    pub fn write_all(&self, dir: &Path, options: &OutputOptions) -> Result<Vec<(PathBuf, WriteOutcome)>> {
        write_all(dir, &self.generate(), options)
    }
}
