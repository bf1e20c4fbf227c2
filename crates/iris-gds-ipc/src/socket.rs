//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Publisher and subscriber sockets over TCP."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Pub/sub sockets. Either side may bind or connect. Subscribers announce
//! their topic prefixes with control frames; publishers only send a payload
//! to a peer that subscribed to a prefix of its topic. Connecting sockets
//! retry until the peer is up and reconnect when it goes away, so a proxy
//! restart is survivable (consumers must tolerate the odd duplicate).
//!
//! Sends never block: payloads are queued per peer and written by
//! background tasks. Receives drain a queue filled by background readers.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use iris_gds_common::IpcConfig;
use parking_lot::Mutex;
use strum::Display;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::frame::{Frame, IpcCodec, IpcPayload};
use crate::ports::Port;
use crate::topics::Topic;
use crate::{IpcError, Result};

/// Direction of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SocketKind {
    /// Sends payloads.
    Publisher,
    /// Receives payloads.
    Subscriber,
}

/// Where a socket listens or connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Listen on this address.
    Bind(SocketAddr),
    /// Connect to this address.
    Connect(SocketAddr),
}

impl Endpoint {
    /// Endpoint for `port` on `host`.
    pub fn resolve(host: &str, port: Port, bind: bool) -> Result<Self> {
        let addr = (host, port.number())
            .to_socket_addrs()
            .map_err(|err| IpcError::Config(format!("cannot resolve {host}: {err}")))?
            .next()
            .ok_or_else(|| IpcError::Config(format!("{host} has no address")))?;
        Ok(if bind {
            Endpoint::Bind(addr)
        } else {
            Endpoint::Connect(addr)
        })
    }

    /// Address bound or connected to.
    pub fn addr(&self) -> SocketAddr {
        match self {
            Endpoint::Bind(addr) | Endpoint::Connect(addr) => *addr,
        }
    }
}

/// Transport tuning shared by every socket of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Largest frame body accepted or sent.
    pub max_frame_bytes: usize,
    /// Pause between connection attempts.
    pub connect_retry: Duration,
}

impl SocketOptions {
    /// Options from the bus config.
    pub fn from_config(config: &IpcConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            connect_retry: config.connect_retry,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from_config(&IpcConfig::default())
    }
}

/// Topic prefixes a peer wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    prefixes: Vec<Vec<u8>>,
}

impl Subscriptions {
    /// Subscriptions to `topics`; every topic when empty.
    pub fn for_topics(topics: &[Topic]) -> Self {
        let mut subs = Self::default();
        for frame in subscribe_frames(topics) {
            subs.apply(&frame);
        }
        subs
    }

    /// Apply a control frame. Data frames are ignored.
    pub fn apply(&mut self, frame: &Frame) {
        match frame {
            Frame::Subscribe(prefix) => self.prefixes.push(prefix.clone()),
            Frame::Unsubscribe(prefix) => {
                if let Some(index) = self.prefixes.iter().position(|p| p == prefix) {
                    self.prefixes.swap_remove(index);
                }
            }
            Frame::Data(_) => {}
        }
    }

    /// Whether a payload with `topic_bytes` is wanted.
    pub fn matches(&self, topic_bytes: &[u8]) -> bool {
        self.prefixes.iter().any(|p| topic_bytes.starts_with(p))
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

fn subscribe_frames(topics: &[Topic]) -> Vec<Frame> {
    if topics.is_empty() {
        vec![Frame::Subscribe(Vec::new())]
    } else {
        topics.iter().map(|t| Frame::Subscribe(t.tag().to_vec())).collect()
    }
}

/// Socket counters.
#[derive(Debug, Default)]
pub struct SocketStats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`SocketStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SocketStatsSnapshot {
    /// Payloads handed to at least one peer.
    pub sent: u64,
    /// Payloads received.
    pub received: u64,
    /// Payloads no peer took, or that failed to write.
    pub dropped: u64,
}

impl SocketStats {
    fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts.
    pub fn snapshot(&self) -> SocketStatsSnapshot {
        SocketStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A subscriber connected to a binding publisher.
struct Peer {
    addr: SocketAddr,
    subs: Arc<Mutex<Subscriptions>>,
    tx: mpsc::UnboundedSender<IpcPayload>,
}

type Peers = Arc<Mutex<Vec<Peer>>>;

enum Outlet {
    /// Binding publisher: payloads fan out to subscribed peers.
    Peers(Peers),
    /// Connecting publisher: one writer task.
    Queue(mpsc::UnboundedSender<IpcPayload>),
}

/// One end of a pub/sub channel.
pub struct IpcSocket {
    name: String,
    kind: SocketKind,
    endpoint: Endpoint,
    outlet: Option<Outlet>,
    inbox: Option<mpsc::UnboundedReceiver<IpcPayload>>,
    stats: Arc<SocketStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for IpcSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcSocket")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| IpcError::Config(format!("cannot bind {addr}: {err}")))
}

async fn connect_with_retry(name: &str, addr: SocketAddr, retry: Duration) -> TcpStream {
    let mut attempts = 0u64;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                info!(socket = name, %addr, attempts, "connected");
                return stream;
            }
            Err(err) => {
                if attempts == 0 {
                    debug!(socket = name, %addr, error = %err, "peer not up yet, retrying");
                }
                attempts += 1;
                tokio::time::sleep(retry).await;
            }
        }
    }
}

impl IpcSocket {
    /// Publisher at `endpoint`.
    pub async fn publisher(
        name: impl Into<String>,
        endpoint: Endpoint,
        opts: SocketOptions,
    ) -> Result<Self> {
        let name = name.into();
        let stats = Arc::new(SocketStats::default());
        let codec = IpcCodec::new(opts.max_frame_bytes);
        let mut socket = Self {
            name: name.clone(),
            kind: SocketKind::Publisher,
            endpoint,
            outlet: None,
            inbox: None,
            stats: stats.clone(),
            tasks: Vec::new(),
        };
        match endpoint {
            Endpoint::Bind(addr) => {
                let listener = bind(addr).await?;
                socket.endpoint = Endpoint::Bind(listener.local_addr()?);
                let peers: Peers = Arc::default();
                socket.outlet = Some(Outlet::Peers(peers.clone()));
                socket.tasks.push(tokio::spawn(accept_subscribers(
                    name, listener, codec, peers, stats,
                )));
            }
            Endpoint::Connect(addr) => {
                let (tx, rx) = mpsc::unbounded_channel();
                socket.outlet = Some(Outlet::Queue(tx));
                socket.tasks.push(tokio::spawn(publish_to_peer(
                    name, addr, codec, opts.connect_retry, rx, stats,
                )));
            }
        }
        info!(socket = %socket.name, endpoint = ?socket.endpoint, "publisher ready");
        Ok(socket)
    }

    /// Subscriber to `topics` (every topic when empty) at `endpoint`.
    pub async fn subscriber(
        name: impl Into<String>,
        endpoint: Endpoint,
        topics: &[Topic],
        opts: SocketOptions,
    ) -> Result<Self> {
        let name = name.into();
        let stats = Arc::new(SocketStats::default());
        let codec = IpcCodec::new(opts.max_frame_bytes);
        let subs = Subscriptions::for_topics(topics);
        let frames = subscribe_frames(topics);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut socket = Self {
            name: name.clone(),
            kind: SocketKind::Subscriber,
            endpoint,
            outlet: None,
            inbox: Some(rx),
            stats: stats.clone(),
            tasks: Vec::new(),
        };
        match endpoint {
            Endpoint::Bind(addr) => {
                let listener = bind(addr).await?;
                socket.endpoint = Endpoint::Bind(listener.local_addr()?);
                socket.tasks.push(tokio::spawn(accept_publishers(
                    name, listener, codec, frames, subs, tx, stats,
                )));
            }
            Endpoint::Connect(addr) => {
                socket.tasks.push(tokio::spawn(subscribe_to_peer(
                    name, addr, codec, opts.connect_retry, frames, subs, tx, stats,
                )));
            }
        }
        info!(socket = %socket.name, endpoint = ?socket.endpoint, ?topics, "subscriber ready");
        Ok(socket)
    }

    /// Socket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Endpoint, with the actual port when bound to port 0.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Counters.
    pub fn stats(&self) -> SocketStatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribers currently connected to a binding publisher.
    pub fn peer_count(&self) -> usize {
        match &self.outlet {
            Some(Outlet::Peers(peers)) => peers.lock().len(),
            _ => 0,
        }
    }

    /// Queue `payload` for every interested peer. Never blocks.
    pub fn send(&self, payload: IpcPayload) -> Result<()> {
        match &self.outlet {
            Some(Outlet::Queue(tx)) => tx.send(payload).map_err(|_| {
                self.stats.dropped();
                IpcError::Closed(format!("{} writer stopped", self.name))
            }),
            Some(Outlet::Peers(peers)) => {
                let mut delivered = false;
                for peer in peers.lock().iter() {
                    if peer.subs.lock().matches(&payload.topic_bytes)
                        && peer.tx.send(payload.clone()).is_ok()
                    {
                        delivered = true;
                    }
                }
                if delivered {
                    self.stats.sent();
                } else {
                    self.stats.dropped();
                }
                Ok(())
            }
            None => Err(IpcError::Config(format!("{} is not a publisher", self.name))),
        }
    }

    /// Next payload.
    pub async fn recv(&mut self) -> Result<IpcPayload> {
        let name = self.name.clone();
        let inbox = self
            .inbox
            .as_mut()
            .ok_or_else(|| IpcError::Config(format!("{name} is not a subscriber")))?;
        inbox
            .recv()
            .await
            .ok_or_else(|| IpcError::Closed(format!("{name} readers stopped")))
    }

    /// Next payload, or `None` after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<IpcPayload>> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(payload) => payload.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// A payload if one is queued.
    pub fn try_recv(&mut self) -> Option<IpcPayload> {
        self.inbox.as_mut()?.try_recv().ok()
    }

    /// Stop every background task.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outlet = None;
    }
}

impl Drop for IpcSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_subscribers(
    name: String,
    listener: TcpListener,
    codec: IpcCodec,
    peers: Peers,
    stats: Arc<SocketStats>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(socket = %name, error = %err, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        debug!(socket = %name, %addr, "subscriber connected");
        let (tx, rx) = mpsc::unbounded_channel();
        let subs = Arc::new(Mutex::new(Subscriptions::default()));
        peers.lock().push(Peer {
            addr,
            subs: subs.clone(),
            tx,
        });
        let name = name.clone();
        let peers = peers.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            serve_subscriber(&name, stream, codec, subs, rx, &stats).await;
            peers.lock().retain(|p| p.addr != addr);
            debug!(socket = %name, %addr, "subscriber gone");
        });
    }
}

async fn serve_subscriber(
    name: &str,
    stream: TcpStream,
    codec: IpcCodec,
    subs: Arc<Mutex<Subscriptions>>,
    mut rx: mpsc::UnboundedReceiver<IpcPayload>,
    stats: &SocketStats,
) {
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(payload) = outgoing else { break };
                if let Err(err) = sink.send(Frame::Data(payload)).await {
                    warn!(socket = name, error = %err, "write to subscriber failed");
                    stats.dropped();
                    break;
                }
            }
            incoming = frames.next() => match incoming {
                Some(Ok(frame)) => subs.lock().apply(&frame),
                Some(Err(err)) => {
                    warn!(socket = name, error = %err, "bad frame from subscriber");
                    break;
                }
                None => break,
            }
        }
    }
}

async fn publish_to_peer(
    name: String,
    addr: SocketAddr,
    codec: IpcCodec,
    retry: Duration,
    mut rx: mpsc::UnboundedReceiver<IpcPayload>,
    stats: Arc<SocketStats>,
) {
    loop {
        let stream = connect_with_retry(&name, addr, retry).await;
        let (mut sink, mut frames) = Framed::new(stream, codec).split();
        let mut subs = Subscriptions::default();

        // A binding subscriber announces itself right away; hold queued
        // payloads until it has, or until one retry interval passes.
        if let Ok(Some(Ok(frame))) = tokio::time::timeout(retry, frames.next()).await {
            subs.apply(&frame);
        }

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(payload) = outgoing else { return };
                    if !subs.matches(&payload.topic_bytes) {
                        stats.dropped();
                        continue;
                    }
                    if let Err(err) = sink.send(Frame::Data(payload)).await {
                        warn!(socket = %name, %addr, error = %err, "write failed, reconnecting");
                        stats.dropped();
                        break;
                    }
                    stats.sent();
                }
                incoming = frames.next() => match incoming {
                    Some(Ok(frame)) => subs.apply(&frame),
                    Some(Err(err)) => {
                        warn!(socket = %name, %addr, error = %err, "bad frame from peer, reconnecting");
                        break;
                    }
                    None => {
                        info!(socket = %name, %addr, "peer closed, reconnecting");
                        break;
                    }
                }
            }
        }
        tokio::time::sleep(retry).await;
    }
}

async fn accept_publishers(
    name: String,
    listener: TcpListener,
    codec: IpcCodec,
    announce: Vec<Frame>,
    subs: Subscriptions,
    tx: mpsc::UnboundedSender<IpcPayload>,
    stats: Arc<SocketStats>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(socket = %name, error = %err, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        debug!(socket = %name, %addr, "publisher connected");
        let name = name.clone();
        let announce = announce.clone();
        let subs = subs.clone();
        let tx = tx.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            read_publisher(&name, stream, codec, &announce, &subs, &tx, &stats).await;
            debug!(socket = %name, %addr, "publisher gone");
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn subscribe_to_peer(
    name: String,
    addr: SocketAddr,
    codec: IpcCodec,
    retry: Duration,
    announce: Vec<Frame>,
    subs: Subscriptions,
    tx: mpsc::UnboundedSender<IpcPayload>,
    stats: Arc<SocketStats>,
) {
    loop {
        let stream = connect_with_retry(&name, addr, retry).await;
        if !read_publisher(&name, stream, codec, &announce, &subs, &tx, &stats).await {
            return;
        }
        info!(socket = %name, %addr, "publisher closed, reconnecting");
        tokio::time::sleep(retry).await;
    }
}

/// Announce subscriptions, then forward matching payloads until the peer
/// goes away. `false` once the local receiver is gone.
async fn read_publisher(
    name: &str,
    stream: TcpStream,
    codec: IpcCodec,
    announce: &[Frame],
    subs: &Subscriptions,
    tx: &mpsc::UnboundedSender<IpcPayload>,
    stats: &SocketStats,
) -> bool {
    let mut framed = Framed::new(stream, codec);
    for frame in announce {
        if let Err(err) = framed.send(frame.clone()).await {
            warn!(socket = name, error = %err, "could not announce subscriptions");
            return true;
        }
    }
    while let Some(incoming) = framed.next().await {
        match incoming {
            Ok(Frame::Data(payload)) => {
                if !subs.matches(&payload.topic_bytes) {
                    continue;
                }
                stats.received();
                if tx.send(payload).is_err() {
                    return false;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(socket = name, error = %err, "bad frame from publisher");
                stats.dropped();
                break;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn any_port() -> Endpoint {
        Endpoint::Bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }

    fn opts() -> SocketOptions {
        SocketOptions {
            max_frame_bytes: 1 << 20,
            connect_retry: Duration::from_millis(20),
        }
    }

    fn payload(topic: Topic, body: u8) -> IpcPayload {
        IpcPayload::new(topic, b"sub".to_vec(), vec![body])
    }

    /// Keep publishing until the subscriber sees something: the first
    /// payloads race the subscription handshake.
    async fn first_delivery(publisher: &IpcSocket, subscriber: &mut IpcSocket, sent: IpcPayload) -> IpcPayload {
        for _ in 0..100 {
            publisher.send(sent.clone()).expect("send");
            if let Some(got) = subscriber.recv_timeout(Duration::from_millis(20)).await.expect("recv") {
                return got;
            }
        }
        panic!("nothing delivered");
    }

    #[test]
    fn subscriptions_match_by_prefix() {
        let mut subs = Subscriptions::for_topics(&[Topic::DlPackets]);
        assert!(subs.matches(b"DP"));
        assert!(!subs.matches(b"DL"));
        subs.apply(&Frame::Unsubscribe(b"DP".to_vec()));
        assert!(subs.is_empty());
        assert!(Subscriptions::for_topics(&[]).matches(b"UK"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn binding_publisher_filters_by_subscription() {
        let publisher = IpcSocket::publisher("pub", any_port(), opts()).await.expect("bind");
        let addr = publisher.endpoint().addr();
        let mut subscriber =
            IpcSocket::subscriber("sub", Endpoint::Connect(addr), &[Topic::DlPackets], opts())
                .await
                .expect("connect");

        let got = first_delivery(&publisher, &mut subscriber, payload(Topic::DlPackets, 1)).await;
        assert_eq!(got.topic(), Some(Topic::DlPackets));
        assert_eq!(publisher.peer_count(), 1);

        publisher.send(payload(Topic::UlPacket, 2)).expect("send");
        publisher.send(payload(Topic::DlPackets, 3)).expect("send");
        let mut bodies = Vec::new();
        while let Some(got) = subscriber.recv_timeout(Duration::from_millis(200)).await.expect("recv") {
            bodies.push(got.msg_bytes[0]);
            if bodies.contains(&3) {
                break;
            }
        }
        assert!(bodies.contains(&3));
        assert!(!bodies.contains(&2), "unsubscribed topic delivered");
        assert!(publisher.stats().dropped >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connecting_publisher_reaches_binding_subscriber() {
        let mut subscriber = IpcSocket::subscriber("sub", any_port(), &[], opts())
            .await
            .expect("bind");
        let addr = subscriber.endpoint().addr();
        let publisher = IpcSocket::publisher("pub", Endpoint::Connect(addr), opts())
            .await
            .expect("connect");

        let got = first_delivery(&publisher, &mut subscriber, payload(Topic::AppControl, 9)).await;
        assert_eq!(got.msg_bytes, vec![9]);
        assert!(subscriber.stats().received >= 1);
    }

    #[tokio::test]
    async fn direction_is_enforced() {
        let mut publisher = IpcSocket::publisher("pub", any_port(), opts()).await.expect("bind");
        assert!(matches!(publisher.recv().await, Err(IpcError::Config(_))));
        let subscriber = IpcSocket::subscriber("sub", any_port(), &[], opts()).await.expect("bind");
        assert!(matches!(
            subscriber.send(payload(Topic::DlPackets, 0)),
            Err(IpcError::Config(_))
        ));
    }

    #[tokio::test]
    async fn binding_a_busy_port_fails_fast() {
        let first = IpcSocket::publisher("a", any_port(), opts()).await.expect("bind");
        let busy = Endpoint::Bind(first.endpoint().addr());
        assert!(matches!(
            IpcSocket::publisher("b", busy, opts()).await,
            Err(IpcError::Config(_))
        ));
    }
}
