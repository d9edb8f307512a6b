//! # TCP Proxy
//!
//! Shares one device link with a remote host tool. The proxy listens on a TCP port and
//! relays each client request through the local `Peer`, answering with the client's own
//! transaction tag. Notifications from the device are copied to the connected client,
//! and notifications from the client are sent on to the device.
//!
//! ## Invariants
//! - **Single Client**: A new connection replaces the previous one.
//! - **Own Tags**: Requests are re-tagged on the device link, so a client cannot collide
//!   with local callers of the same peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::warn;

use loamrpc::Frame;
use loamrpc::FrameKind;
use loamrpc::Header;
use loamrpc::frame::encode_frame;

use crate::peer::Error;
use crate::peer::Peer;
use crate::peer::RemoteFailure;
use crate::peer::Result;
use crate::peer::Subscription;
use crate::transport;
use crate::transport::framing::read_frame;
use crate::transport::framing::write_frame;

type ClientSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>;

pub struct TcpProxy {
    peer: Arc<Peer>,
    local_addr: SocketAddr,
    subscriptions: Vec<Subscription>,
    listener: JoinHandle<()>,
}

impl TcpProxy {
    /// Starts listening on `addr`, for example `0.0.0.0:50051`.
    pub async fn bind(peer: Arc<Peer>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(transport::Error::Unavailable(format!("bind {}: {}", addr, e))))?;
        let local_addr = listener.local_addr().map_err(transport::Error::from)?;

        let client: ClientSlot = Arc::default();
        let role = peer.role();
        let ids: Vec<u16> = peer
            .protocol()
            .notifications()
            .filter(|s| s.direction().is_some_and(|d| d.received_by(role)))
            .map(|s| s.id())
            .collect();
        let mut subscriptions = Vec::with_capacity(ids.len());
        for id in ids {
            let slot = client.clone();
            subscriptions.push(peer.subscribe_raw(id, move |payload| forward(&slot, id, payload))?);
        }

        debug!(peer = peer.name(), addr = %local_addr, "proxy listening");
        let listener = tokio::spawn(accept_loop(listener, peer.clone(), client));
        Ok(Self { peer, local_addr, subscriptions, listener })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpProxy {
    fn drop(&mut self) {
        self.listener.abort();
        for subscription in &self.subscriptions {
            self.peer.unsubscribe(subscription);
        }
    }
}

fn forward(slot: &ClientSlot, id: u16, payload: &[u8]) {
    if let Ok(guard) = slot.lock() {
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(encode_frame(Header::notification(id), payload));
        }
    }
}

async fn accept_loop(listener: TcpListener, peer: Arc<Peer>, slot: ClientSlot) {
    // Dropping the set aborts the client task along with this loop.
    let mut client = JoinSet::new();
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(peer = peer.name(), error = %e, "proxy accept failed");
                continue;
            }
        };
        client.shutdown().await;
        debug!(peer = peer.name(), client = %remote, "proxy client connected");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(tx.clone());
        }
        client.spawn(serve_client(stream, peer.clone(), tx, rx));
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: Arc<Peer>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let write = async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(error = %e, "proxy client write failed");
                break;
            }
        }
    };

    let read = async {
        let mut calls = JoinSet::new();
        loop {
            while calls.try_join_next().is_some() {}
            let bytes = match read_frame(&mut reader).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "proxy client read failed");
                    break;
                }
            };
            let frame = match Frame::decode(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(peer = peer.name(), error = %e, "dropping malformed frame from proxy client");
                    continue;
                }
            };
            match frame.header.kind {
                FrameKind::Request => {
                    let peer = peer.clone();
                    let tx = tx.clone();
                    let header = frame.header;
                    let payload = frame.payload.to_vec();
                    calls.spawn(async move {
                        let _ = tx.send(relay(&peer, header, &payload).await);
                    });
                }
                FrameKind::Notification => {
                    if let Err(e) = peer.notify_raw(frame.header.id, frame.payload).await {
                        warn!(peer = peer.name(), id = frame.header.id, error = %e, "proxy could not forward notification");
                    }
                }
                other => warn!(peer = peer.name(), kind = ?other, "dropping unexpected frame from proxy client"),
            }
        }
    };

    tokio::select! {
        _ = write => {}
        _ = read => {}
    }
    debug!(peer = peer.name(), "proxy client disconnected");
}

/// Runs one client request through the peer and builds the reply frame.
async fn relay(peer: &Peer, request: Header, payload: &[u8]) -> Vec<u8> {
    match peer.call_raw(request.id, payload).await {
        Ok(bytes) => encode_frame(request.reply(FrameKind::Response), &bytes),
        Err(Error::Remote(RemoteFailure::Unsupported)) | Err(Error::UnknownSignature(_)) => {
            encode_frame(request.reply(FrameKind::Unsupported), &[])
        }
        Err(Error::Remote(RemoteFailure::Failed(reason))) => {
            encode_frame(request.reply(FrameKind::Error), reason.as_bytes())
        }
        Err(e) => encode_frame(request.reply(FrameKind::Error), e.to_string().as_bytes()),
    }
}
