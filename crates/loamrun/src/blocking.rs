//! Synchronous facade over `Peer` for callers on plain threads.
//!
//! The wrapper owns a small multi-threaded runtime. The pump runs on its workers,
//! so notification callbacks keep firing while the calling thread is blocked in a call.
//! Do not use a `BlockingPeer` from inside another tokio runtime.

use std::sync::Arc;

use tokio::runtime::Runtime;

use loampack::Value;
use loamrpc::Protocol;

use crate::config;
use crate::config::PeerConfig;
use crate::config::TransportConfig;
use crate::peer::Error;
use crate::peer::Peer;
use crate::peer::PeerHandle;
use crate::peer::Result;
use crate::peer::Subscription;
use crate::transport;
use crate::transport::Transport;

pub struct BlockingPeer {
    // Dropped before the runtime it runs on.
    peer: Peer,
    runtime: Runtime,
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("loamrun-pump")
        .enable_all()
        .build()
        .map_err(|e| Error::Transport(transport::Error::from(e)))
}

impl BlockingPeer {
    /// Wraps a transport that does not depend on a particular runtime's reactor,
    /// such as `ChannelTransport`.
    pub fn new(config: PeerConfig, protocol: Arc<Protocol>, transport: Box<dyn Transport>) -> Result<Self> {
        let runtime = runtime()?;
        let peer = {
            let _guard = runtime.enter();
            Peer::new(config, protocol, transport)
        };
        Ok(Self { peer, runtime })
    }

    /// Opens `transport` on the owned runtime and starts a peer over it.
    pub fn connect(config: PeerConfig, protocol: Arc<Protocol>, transport: &TransportConfig) -> Result<Self> {
        let runtime = runtime()?;
        let transport = runtime.block_on(config::connect(transport))?;
        let peer = {
            let _guard = runtime.enter();
            Peer::new(config, protocol, transport)
        };
        Ok(Self { peer, runtime })
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn handle(&self) -> PeerHandle {
        self.peer.handle()
    }

    /// Blocks the current thread until the call resolves, times out or fails.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        self.runtime.block_on(self.peer.call(name, args))
    }

    pub fn call_raw(&self, id: u16, payload: &[u8]) -> Result<Vec<u8>> {
        self.runtime.block_on(self.peer.call_raw(id, payload))
    }

    pub fn notify(&self, name: &str, args: &[Value]) -> Result<()> {
        self.runtime.block_on(self.peer.notify(name, args))
    }

    pub fn notify_raw(&self, id: u16, payload: &[u8]) -> Result<()> {
        self.runtime.block_on(self.peer.notify_raw(id, payload))
    }

    pub fn subscribe<F>(&self, name: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.peer.subscribe(name, callback)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.peer.unsubscribe(subscription)
    }

    pub fn serve<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&[Value]) -> std::result::Result<Option<Value>, String> + Send + Sync + 'static,
    {
        self.peer.serve(name, handler)
    }

    /// Closes the transport and waits for it to be released.
    pub fn shutdown(self) -> Result<()> {
        let Self { peer, runtime } = self;
        runtime.block_on(peer.shutdown())
    }
}
