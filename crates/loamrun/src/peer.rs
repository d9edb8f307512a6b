//! # RPC Peer with Async Pump
//!
//! This module provides the `Peer` abstraction for making calls and exchanging
//! notifications over a transport. A background pump task reads every incoming
//! frame and routes it: responses to the pending call with the same `(id, txn)`,
//! notifications to their subscribers, requests to the registered handler.
//!
//! ## Invariants
//! - **Register Before Send**: A call's pending slot exists before its request leaves,
//!   so a fast response always finds it.
//! - **No Crossover**: Pending calls are keyed by identifier and transaction tag. Two
//!   concurrent calls to the same identifier never see each other's response.
//! - **Stale Is Dropped**: A call that times out or is cancelled removes its slot. A late
//!   response then matches nothing and is discarded.
//! - **Fail Together**: When the stream ends every pending call fails with the same
//!   transport error, and later operations fail fast.
//! - **Cooperative Callbacks**: Subscribers and handlers run on the pump task, one at a
//!   time. A callback that blocks stalls the whole peer.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use loampack::Pack;
use loampack::Value;
use loamrpc::Frame;
use loamrpc::FrameKind;
use loamrpc::Header;
use loamrpc::Protocol;
use loamrpc::Role;
use loamrpc::Signature;
use loamrpc::frame::encode_frame;

use crate::config::PeerConfig;
use crate::transport;
use crate::transport::Transport;

/// Why the remote end failed to answer a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// The handler ran and failed, with its reason.
    Failed(String),
    /// No handler is registered for the identifier.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport failed or the stream ended.
    Transport(transport::Error),
    /// No response arrived within the configured timeout.
    CallTimeout,
    /// The response does not fit the declared return type.
    ProtocolViolation(String),
    /// Arguments or results failed to encode or decode.
    Codec(loampack::Error),
    Rpc(loamrpc::Error),
    Remote(RemoteFailure),
    /// No call or notification of that name or identifier.
    UnknownSignature(String),
    /// The notification does not travel in that direction for this role.
    WrongDirection(String),
    /// Every transaction tag for the identifier is in use.
    TooManyPending(u16),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::CallTimeout => write!(f, "Call timed out"),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Remote(RemoteFailure::Failed(reason)) => write!(f, "Remote failure: {}", reason),
            Self::Remote(RemoteFailure::Unsupported) => write!(f, "Remote does not support this call"),
            Self::UnknownSignature(name) => write!(f, "Unknown signature: {}", name),
            Self::WrongDirection(name) => write!(f, "Notification {} does not travel this way", name),
            Self::TooManyPending(id) => write!(f, "Too many pending calls to {:#05x}", id),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<loampack::Error> for Error {
    fn from(e: loampack::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<loamrpc::Error> for Error {
    fn from(e: loamrpc::Error) -> Self {
        match e {
            loamrpc::Error::Codec(e) => Self::Codec(e),
            other => Self::Rpc(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes the response payload of call `name` with a generated `Pack` type.
pub fn unpack_reply<T: Pack>(name: &str, payload: &[u8]) -> Result<T> {
    T::from_bytes(payload).map_err(|e| reply_error(name, e))
}

/// Checks the response payload of a void call.
pub fn expect_empty_reply(name: &str, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    Err(Error::ProtocolViolation(format!("{}: void call answered with {} bytes", name, payload.len())))
}

/// A response whose size does not match its return type is a protocol violation,
/// anything else stays a codec error.
fn reply_error(name: &str, e: loampack::Error) -> Error {
    match e {
        loampack::Error::TrailingBytes { .. } | loampack::Error::TruncatedMessage { .. } => {
            Error::ProtocolViolation(format!("{}: {}", name, e))
        }
        other => Error::Codec(other),
    }
}

type RawCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
type RawHandler = Arc<dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, String> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u16,
    key: u64,
}

impl Subscription {
    /// Identifier of the notification subscribed to.
    pub fn id(&self) -> u16 {
        self.id
    }
}

/// A call waiting for its response.
struct PendingCall {
    token: u64,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// State shared by the peer, its pump and its handles.
struct Shared {
    name: String,
    role: Role,
    protocol: Arc<Protocol>,
    transport: Arc<dyn Transport>,
    pending: DashMap<(u16, u8), PendingCall>,
    subscribers: DashMap<u16, Vec<(u64, RawCallback)>>,
    handlers: DashMap<u16, RawHandler>,
    next_txn: AtomicUsize,
    next_key: AtomicU64,
    closed: OnceLock<transport::Error>,
    closed_signal: watch::Sender<bool>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

impl Shared {
    fn check_open(&self) -> Result<()> {
        match self.closed.get() {
            Some(e) => Err(Error::Transport(e.clone())),
            None => Ok(()),
        }
    }

    /// Claims a free transaction tag for `id` and registers the pending slot.
    fn register(&self, id: u16) -> Result<(u8, u64, oneshot::Receiver<Result<Vec<u8>>>)> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_key.fetch_add(1, Ordering::Relaxed);
        for _ in 0..u8::MAX {
            // Tags run 1..=255, zero is reserved for notifications.
            let txn = (self.next_txn.fetch_add(1, Ordering::Relaxed) % 255) as u8 + 1;
            if let Entry::Vacant(slot) = self.pending.entry((id, txn)) {
                slot.insert(PendingCall { token, tx });
                return Ok((txn, token, rx));
            }
        }
        Err(Error::TooManyPending(id))
    }

    /// Removes a pending slot, unless it has been reused by another call.
    fn forget(&self, key: (u16, u8), token: u64) {
        self.pending.remove_if(&key, |_, call| call.token == token);
    }

    fn fail_all(&self, error: transport::Error) {
        let _ = self.closed.set(error.clone());
        self.closed_signal.send_replace(true);
        let keys: Vec<(u16, u8)> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, call)) = self.pending.remove(&key) {
                let _ = call.tx.send(Err(Error::Transport(error.clone())));
            }
        }
    }

    fn call_signature(&self, name: &str) -> Result<&Signature> {
        self.protocol
            .by_name(name)
            .filter(|s| s.is_call())
            .ok_or_else(|| Error::UnknownSignature(name.to_string()))
    }

    fn notification_signature(&self, name: &str) -> Result<&Signature> {
        self.protocol
            .by_name(name)
            .filter(|s| !s.is_call())
            .ok_or_else(|| Error::UnknownSignature(name.to_string()))
    }

    /// Checks that this peer may originate notification `id`.
    fn outgoing_notification(&self, id: u16) -> Result<&Signature> {
        let sig = self
            .protocol
            .notification(id)
            .ok_or_else(|| Error::UnknownSignature(format!("notification {:#05x}", id)))?;
        match sig.direction() {
            Some(d) if d.sent_by(self.role) => Ok(sig),
            _ => Err(Error::WrongDirection(sig.name().to_string())),
        }
    }

    fn unsubscribe(&self, subscription: &Subscription) -> bool {
        match self.subscribers.get_mut(&subscription.id) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|(key, _)| *key != subscription.key);
                subs.len() != before
            }
            None => false,
        }
    }

    async fn dispatch(&self, bytes: &[u8]) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %self.name, error = %e, len = bytes.len(), "dropping malformed frame");
                return;
            }
        };
        let Header { kind, txn, id } = frame.header;
        match kind {
            FrameKind::Request => self.answer(frame.header, frame.payload).await,
            FrameKind::Notification => self.deliver(id, frame.payload),
            FrameKind::Response => self.resolve(id, txn, Ok(frame.payload.to_vec())),
            FrameKind::Error => {
                let reason = String::from_utf8_lossy(frame.payload).into_owned();
                self.resolve(id, txn, Err(Error::Remote(RemoteFailure::Failed(reason))))
            }
            FrameKind::Unsupported => self.resolve(id, txn, Err(Error::Remote(RemoteFailure::Unsupported))),
        }
    }

    fn resolve(&self, id: u16, txn: u8, result: Result<Vec<u8>>) {
        match self.pending.remove(&(id, txn)) {
            Some((_, call)) => {
                let _ = call.tx.send(result);
            }
            None => debug!(peer = %self.name, id, txn, "dropping response with no pending call"),
        }
    }

    fn deliver(&self, id: u16, payload: &[u8]) {
        let Some(sig) = self.protocol.notification(id) else {
            warn!(peer = %self.name, id, "dropping unknown notification");
            return;
        };
        if !sig.direction().is_some_and(|d| d.received_by(self.role)) {
            warn!(peer = %self.name, notification = sig.name(), "dropping notification not addressed to this role");
            return;
        }

        // Cloned out so callbacks may (un)subscribe without deadlocking the map.
        let callbacks: Vec<RawCallback> = match self.subscribers.get(&id) {
            Some(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            None => Vec::new(),
        };
        if callbacks.is_empty() {
            debug!(peer = %self.name, notification = sig.name(), "no subscribers");
        }
        for callback in callbacks {
            callback(payload);
        }
    }

    async fn answer(&self, request: Header, payload: &[u8]) {
        let handler = self.handlers.get(&request.id).map(|h| h.value().clone());
        let reply = match handler {
            Some(handler) => match handler(payload) {
                Ok(bytes) => encode_frame(request.reply(FrameKind::Response), &bytes),
                Err(reason) => {
                    warn!(peer = %self.name, id = request.id, reason = %reason, "handler failed");
                    encode_frame(request.reply(FrameKind::Error), reason.as_bytes())
                }
            },
            None => {
                debug!(peer = %self.name, id = request.id, "no handler, answering unsupported");
                encode_frame(request.reply(FrameKind::Unsupported), &[])
            }
        };
        if let Err(e) = self.transport.send(&reply).await {
            warn!(peer = %self.name, error = %e, "failed to send reply");
        }
    }
}

async fn run_pump(shared: Arc<Shared>) {
    let error = loop {
        match shared.transport.recv().await {
            Ok(Some(bytes)) => shared.dispatch(&bytes).await,
            Ok(None) => break transport::Error::ConnectionLost("Stream closed".into()),
            Err(e) => break e,
        }
    };
    warn!(peer = %shared.name, error = %error, "pump stopped");
    shared.fail_all(error);
}

/// Removes the pending slot when a call returns or is dropped mid-flight.
struct PendingGuard<'a> {
    shared: &'a Shared,
    key: (u16, u8),
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.key, self.token);
    }
}

/// RPC endpoint with an async message pump.
///
/// Each Peer owns its transport exclusively, so transaction tags are scoped to a
/// single link. Several peers over different transports never interfere.
pub struct Peer {
    config: PeerConfig,
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Peer {
    /// Creates a new peer and spawns its pump on the current tokio runtime.
    pub fn new(config: PeerConfig, protocol: Arc<Protocol>, transport: Box<dyn Transport>) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let (outbox, mut queue) = mpsc::unbounded_channel::<Vec<u8>>();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            role: config.role,
            protocol,
            transport: transport.clone(),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            handlers: DashMap::new(),
            next_txn: AtomicUsize::new(0),
            next_key: AtomicU64::new(1),
            closed: OnceLock::new(),
            closed_signal: watch::channel(false).0,
            outbox,
        });

        let pump = tokio::spawn(run_pump(shared.clone()));

        // Frames posted from callbacks, which cannot await the transport themselves.
        let peer_name = config.name.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if let Err(e) = transport.send(&frame).await {
                    warn!(peer = %peer_name, error = %e, "failed to send posted frame");
                }
            }
        });

        debug!(peer = %config.name, role = ?config.role, "peer started");
        Self { config, shared, pump, writer }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.shared.protocol
    }

    /// True once the stream has ended or the peer was shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get().is_some()
    }

    /// Resolves once the peer is closed, for whatever reason.
    pub async fn closed(&self) {
        let mut signal = self.shared.closed_signal.subscribe();
        let _ = signal.wait_for(|closed| *closed).await;
    }

    /// A cheap handle usable from inside callbacks and handlers.
    pub fn handle(&self) -> PeerHandle {
        PeerHandle { shared: self.shared.clone() }
    }

    /// Calls `name` and waits for its result. Void calls return `None`.
    ///
    /// # Errors
    /// - `CallTimeout` if no response arrives in time.
    /// - `Transport` if the link fails before the response.
    /// - `ProtocolViolation` if the response size does not match the return type, or a void
    ///   call carries a payload.
    /// - `Remote` if the device failed or does not implement the call.
    pub async fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let sig = self.shared.call_signature(name)?;
        let payload = sig.encode_args(args)?;
        let reply = self.call_raw(sig.id(), &payload).await?;
        sig.decode_return(&reply).map_err(|e| match e {
            loamrpc::Error::Codec(e) => reply_error(name, e),
            loamrpc::Error::UnexpectedPayload { .. } => Error::ProtocolViolation(format!("{}: {}", name, e)),
            other => other.into(),
        })
    }

    /// Sends an already encoded request and waits for the raw response payload.
    pub async fn call_raw(&self, id: u16, payload: &[u8]) -> Result<Vec<u8>> {
        if self.shared.protocol.call(id).is_none() {
            return Err(Error::UnknownSignature(format!("call {:#05x}", id)));
        }
        self.shared.check_open()?;

        let (txn, token, rx) = self.shared.register(id)?;
        let _guard = PendingGuard { shared: &self.shared, key: (id, txn), token };
        // The pump may have failed everything between the first check and registration.
        self.shared.check_open()?;

        let frame = encode_frame(Header::request(id, txn), payload);
        debug!(peer = %self.config.name, id, txn, len = payload.len(), "call");
        self.shared.transport.send(&frame).await?;

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(peer = %self.config.name, id, txn, "call timed out");
                    return Err(Error::CallTimeout);
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| Err(Error::Transport(transport::Error::ConnectionLost("Peer shut down".into()))))
    }

    /// Sends notification `name`. Never waits for an answer.
    pub async fn notify(&self, name: &str, args: &[Value]) -> Result<()> {
        let sig = self.shared.notification_signature(name)?;
        let payload = sig.encode_args(args)?;
        self.notify_raw(sig.id(), &payload).await
    }

    /// Sends an already encoded notification.
    pub async fn notify_raw(&self, id: u16, payload: &[u8]) -> Result<()> {
        self.shared.outgoing_notification(id)?;
        self.shared.check_open()?;
        let frame = encode_frame(Header::notification(id), payload);
        self.shared.transport.send(&frame).await?;
        Ok(())
    }

    /// Runs `callback` with the decoded arguments of every notification `name`
    /// addressed to this peer's role, in subscription order.
    pub fn subscribe<F>(&self, name: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let sig = self.shared.notification_signature(name)?.clone();
        let peer = self.config.name.clone();
        self.subscribe_raw(sig.id(), move |payload| match sig.decode_args(payload) {
            Ok(args) => callback(&args),
            Err(e) => warn!(peer = %peer, notification = sig.name(), error = %e, "dropping undecodable notification"),
        })
    }

    /// Runs `callback` with the raw payload of every notification `id`.
    pub fn subscribe_raw<F>(&self, id: u16, callback: F) -> Result<Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let sig = self
            .shared
            .protocol
            .notification(id)
            .ok_or_else(|| Error::UnknownSignature(format!("notification {:#05x}", id)))?;
        if !sig.direction().is_some_and(|d| d.received_by(self.config.role)) {
            return Err(Error::WrongDirection(sig.name().to_string()));
        }
        let key = self.shared.next_key.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.entry(id).or_default().push((key, Arc::new(callback)));
        Ok(Subscription { id, key })
    }

    /// Forwards every notification `name` into a channel.
    pub fn notifications(&self, name: &str) -> Result<(Subscription, mpsc::UnboundedReceiver<Vec<Value>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(name, move |args| {
            let _ = tx.send(args.to_vec());
        })?;
        Ok((subscription, rx))
    }

    /// Removes a subscription. Safe to call from inside a callback.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.unsubscribe(subscription)
    }

    /// Answers requests for call `name` with `handler`.
    ///
    /// An `Err` from the handler is sent back as a remote failure.
    pub fn serve<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&[Value]) -> std::result::Result<Option<Value>, String> + Send + Sync + 'static,
    {
        let sig = self.shared.call_signature(name)?.clone();
        self.serve_raw(sig.id(), move |payload| {
            let args = sig.decode_args(payload).map_err(|e| format!("bad arguments: {}", e))?;
            let ret = handler(&args)?;
            sig.encode_return(ret.as_ref()).map_err(|e| format!("bad return value: {}", e))
        })
    }

    /// Answers requests for call `id` with a handler working on raw payloads.
    pub fn serve_raw<F>(&self, id: u16, handler: F) -> Result<()>
    where
        F: Fn(&[u8]) -> std::result::Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        if self.shared.protocol.call(id).is_none() {
            return Err(Error::UnknownSignature(format!("call {:#05x}", id)));
        }
        self.shared.handlers.insert(id, Arc::new(handler));
        Ok(())
    }

    /// Stops the pump, closes the transport and fails every pending call.
    pub async fn shutdown(self) -> Result<()> {
        self.pump.abort();
        self.shared.fail_all(transport::Error::ConnectionLost("Peer shut down".into()));
        self.shared.transport.close().await?;
        Ok(())
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.pump.abort();
        self.writer.abort();
        // Callbacks may hold handles back to the peer.
        self.shared.subscribers.clear();
        self.shared.handlers.clear();
        self.shared.fail_all(transport::Error::ConnectionLost("Peer dropped".into()));
    }
}

/// A clonable, synchronous view of a `Peer` for use inside callbacks.
#[derive(Clone)]
pub struct PeerHandle {
    shared: Arc<Shared>,
}

impl PeerHandle {
    /// Queues notification `name` for sending. Returns once queued.
    pub fn post(&self, name: &str, args: &[Value]) -> Result<()> {
        let sig = self.shared.notification_signature(name)?;
        let payload = sig.encode_args(args)?;
        self.post_raw(sig.id(), &payload)
    }

    /// Queues an already encoded notification.
    pub fn post_raw(&self, id: u16, payload: &[u8]) -> Result<()> {
        self.shared.outgoing_notification(id)?;
        self.shared.check_open()?;
        self.shared
            .outbox
            .send(encode_frame(Header::notification(id), payload))
            .map_err(|_| Error::Transport(transport::Error::ConnectionLost("Writer stopped".into())))
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.unsubscribe(subscription)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.get().is_some()
    }
}
