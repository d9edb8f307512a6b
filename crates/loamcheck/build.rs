//! Generates the Rust and C bindings of the reference protocol into `OUT_DIR`, then
//! compiles the C side together with the reference firmware.

use std::env;
use std::path::PathBuf;

use loamgen::CTarget;
use loamgen::Generator;
use loamgen::OutputOptions;
use loamgen::RustTarget;

#[path = "src/protocol.rs"]
mod protocol;

fn main() -> anyhow::Result<()> {
    println!("cargo::rerun-if-changed=src/protocol.rs");
    println!("cargo::rerun-if-changed=csrc/firmware.c");
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let protocol = protocol::test_protocol()?;
    Generator::new(&protocol)
        .target(RustTarget)
        .target(CTarget)
        .write_all(&out_dir, &OutputOptions::default())?;

    cc::Build::new()
        .file(out_dir.join("test_protocol.c"))
        .file("csrc/firmware.c")
        .include(&out_dir)
        .flag_if_supported("-std=c99")
        .compile("loamcheck_firmware");
    Ok(())
}
