//! The mock device behind a pipe: frames on stdin/stdout, logs on stderr.
//!
//! Exits when the host closes stdin.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use loamcheck::device;
use loamcheck::protocol::test_protocol;
use loamrun::Peer;
use loamrun::PeerConfig;
use loamrun::transport::StdioTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let protocol = Arc::new(test_protocol()?);
    let peer = Peer::new(PeerConfig::device("mock_device"), protocol, Box::new(StdioTransport::new()));
    device::attach(&peer)?;
    info!("mock device ready");

    peer.closed().await;
    info!("host closed the link");
    Ok(())
}
