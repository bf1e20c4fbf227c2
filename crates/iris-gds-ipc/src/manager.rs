//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Async and sync app managers over the IPC bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! App managers. An app declares its sockets as [`SocketSpec`]s; the manager
//! opens them and owns the shutdown sequence.
//!
//! [`AppManager`] runs one task per subscriber socket and routes each
//! payload to the [`SocketTopicHandler`] attached to that socket. Handling
//! is serial per socket. A process-wide broadcast channel carries the
//! shutdown request, which is honoured between messages only.
//!
//! [`AppManagerSync`] exposes the same sockets through a blocking
//! `read`/`send_to` API for simple pipelines.
//!
//! Both managers act on [`AppControlMessage`]s themselves: a `Shutdown`
//! addressed to the app becomes an [`IpcError::EndAppRequest`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iris_gds_common::{IpcConfig, PipelineMetrics};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::frame::IpcPayload;
use crate::messages::{AppAction, AppControlMessage, MessageContent};
use crate::ports::{Port, PortSide};
use crate::serializer::Serializer;
use crate::socket::{Endpoint, IpcSocket, SocketKind, SocketOptions};
use crate::topics::Topic;
use crate::{IpcError, Result};

/// Declaration of one socket of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    /// Name used with `send_to`, `read`, and `attach`.
    pub name: String,
    /// Well-known port. Its side decides the direction of the socket.
    pub port: Port,
    /// Bind instead of connect.
    pub bind: bool,
    /// Topics of a subscriber; every topic when empty.
    pub topics: Vec<Topic>,
    /// Address that replaces `host:port`, for tests and tunnels.
    pub addr: Option<SocketAddr>,
}

impl SocketSpec {
    /// Connecting socket on `port`.
    pub fn new(name: impl Into<String>, port: Port) -> Self {
        Self {
            name: name.into(),
            port,
            bind: false,
            topics: Vec::new(),
            addr: None,
        }
    }

    /// Restrict a subscriber to `topics`.
    pub fn subscribing(mut self, topics: &[Topic]) -> Self {
        self.topics = topics.to_vec();
        self
    }

    /// Bind the port instead of connecting to it.
    pub fn binding(mut self) -> Self {
        self.bind = true;
        self
    }

    /// Use `addr` instead of the configured host and the port number.
    pub fn at(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Publishers use pub-side ports, subscribers sub-side ports.
    pub fn kind(&self) -> SocketKind {
        match self.port.side() {
            PortSide::Pub => SocketKind::Publisher,
            PortSide::Sub => SocketKind::Subscriber,
        }
    }

    fn endpoint(&self, host: &str) -> Result<Endpoint> {
        match self.addr {
            Some(addr) if self.bind => Ok(Endpoint::Bind(addr)),
            Some(addr) => Ok(Endpoint::Connect(addr)),
            None => Endpoint::resolve(host, self.port, self.bind),
        }
    }
}

/// Async handler for payloads of one topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Handle one payload. [`IpcError::EndAppRequest`] stops the app.
    async fn handle(&self, ctx: &AppContext, payload: IpcPayload) -> Result<()>;
}

#[async_trait]
impl<F, Fut> TopicHandler for F
where
    F: Fn(AppContext, IpcPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &AppContext, payload: IpcPayload) -> Result<()> {
        (self)(ctx.clone(), payload).await
    }
}

/// Handlers of a socket, by topic.
pub type TopicHandlerTable = HashMap<Topic, Arc<dyn TopicHandler>>;

/// Something that handles the payloads arriving on a socket.
pub trait SocketTopicHandler: Send + Sync {
    /// Handler registry, read once when the handler is attached.
    fn handlers(&self) -> TopicHandlerTable;

    /// Fail on a topic with no handler instead of dropping the payload.
    fn raise_on_unhandled_topics(&self) -> bool {
        false
    }
}

/// A [`SocketTopicHandler`] resolved for dispatch.
#[derive(Clone)]
pub struct SocketHandler {
    table: TopicHandlerTable,
    raise_on_unhandled: bool,
}

impl std::fmt::Debug for SocketHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandler")
            .field("topics", &self.table.keys().collect::<Vec<_>>())
            .field("raise_on_unhandled", &self.raise_on_unhandled)
            .finish()
    }
}

impl SocketHandler {
    /// Snapshot the registry of `handler`.
    pub fn new(handler: &dyn SocketTopicHandler) -> Self {
        Self {
            table: handler.handlers(),
            raise_on_unhandled: handler.raise_on_unhandled_topics(),
        }
    }

    /// Whether `topic` has a handler.
    pub fn handles(&self, topic: Topic) -> bool {
        self.table.contains_key(&topic)
    }

    /// Run the handler registered for the payload's topic.
    pub async fn dispatch(&self, ctx: &AppContext, payload: IpcPayload) -> Result<()> {
        let handler = payload.topic().and_then(|topic| self.table.get(&topic));
        match handler {
            Some(handler) => handler.handle(ctx, payload).await,
            None if self.raise_on_unhandled => Err(IpcError::UnhandledTopic(
                String::from_utf8_lossy(&payload.topic_bytes).into_owned(),
            )),
            None => {
                debug!(
                    app = ctx.app_name(),
                    topic = %String::from_utf8_lossy(&payload.topic_bytes),
                    "no handler, dropping payload"
                );
                Ok(())
            }
        }
    }
}

struct ContextInner {
    app_name: String,
    serializer: Serializer,
    publishers: HashMap<String, IpcSocket>,
    metrics: PipelineMetrics,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
}

/// Shared view of an app: its publishers, serializer, metrics, and the
/// shutdown channel. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("app_name", &self.inner.app_name)
            .field("publishers", &self.inner.publishers.keys().collect::<Vec<_>>())
            .field("stopping", &self.is_shutting_down())
            .finish()
    }
}

fn topic_label(payload: &IpcPayload) -> String {
    match payload.topic() {
        Some(topic) => topic.to_string(),
        None => String::from_utf8_lossy(&payload.topic_bytes).into_owned(),
    }
}

impl AppContext {
    /// Name the app answers to on `APP_CONTROL`.
    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    /// Envelope serializer.
    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    /// Pipeline counters.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.inner.metrics
    }

    /// Serialize `content` and publish it on `socket` under the topic that
    /// carries its type. Never blocks.
    pub fn send_to(
        &self,
        socket: &str,
        content: impl Into<MessageContent>,
        subtopic: &[u8],
    ) -> Result<()> {
        let content = content.into();
        let topic = Topic::for_kind(content.kind());
        let msg = self.inner.serializer.encode(&content)?;
        self.send_payload(socket, IpcPayload::new(topic, subtopic.to_vec(), msg))
    }

    /// Publish an already serialized payload on `socket`.
    pub fn send_payload(&self, socket: &str, payload: IpcPayload) -> Result<()> {
        let publisher = self
            .inner
            .publishers
            .get(socket)
            .ok_or_else(|| IpcError::Config(format!("no publisher socket named {socket}")))?;
        self.inner.metrics.record_ipc(&topic_label(&payload), "tx");
        publisher.send(payload)
    }

    /// Verified content of `payload`, checked against its topic.
    pub fn decode(&self, payload: &IpcPayload) -> Result<MessageContent> {
        let topic = payload.topic().ok_or_else(|| {
            IpcError::Decode(format!(
                "unknown topic tag {:?}",
                String::from_utf8_lossy(&payload.topic_bytes)
            ))
        })?;
        self.inner.serializer.decode_for(topic, &payload.msg_bytes)
    }

    /// Ask every task of the app to stop after its current message.
    pub fn request_shutdown(&self) {
        if !self.inner.stopping.swap(true, Ordering::SeqCst) {
            info!(app = %self.inner.app_name, "shutdown requested");
        }
        let _ = self.inner.shutdown.send(());
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Receiver that fires once shutdown is requested.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }

    /// Wait until shutdown is requested.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.subscribe_shutdown();
        if self.is_shutting_down() {
            return;
        }
        let _ = rx.recv().await;
    }
}

/// Act on an `APP_CONTROL` payload addressed to this app.
fn apply_app_control(ctx: &AppContext, payload: &IpcPayload) -> Result<()> {
    if payload.topic() != Some(Topic::AppControl) {
        return Ok(());
    }
    let control = AppControlMessage::try_from(ctx.decode(payload)?)?;
    if !control.addresses(ctx.app_name()) {
        return Ok(());
    }
    match control.action {
        AppAction::Shutdown => Err(IpcError::EndAppRequest(format!(
            "{} received over {}",
            control.action,
            Topic::AppControl
        ))),
        AppAction::Heartbeat => {
            debug!(app = ctx.app_name(), "heartbeat");
            Ok(())
        }
    }
}

async fn handle_payload(ctx: &AppContext, handler: &SocketHandler, payload: IpcPayload) -> Result<()> {
    ctx.metrics().record_ipc(&topic_label(&payload), "rx");
    if payload.topic() == Some(Topic::AppControl) {
        apply_app_control(ctx, &payload)?;
        if !handler.handles(Topic::AppControl) {
            return Ok(());
        }
    }
    handler.dispatch(ctx, payload).await
}

async fn open_sockets(
    app_name: &str,
    config: &IpcConfig,
    specs: &[SocketSpec],
    metrics: PipelineMetrics,
) -> Result<(AppContext, HashMap<String, IpcSocket>)> {
    let opts = SocketOptions::from_config(config);
    let mut publishers = HashMap::new();
    let mut subscribers = HashMap::new();
    for spec in specs {
        if publishers.contains_key(&spec.name) || subscribers.contains_key(&spec.name) {
            return Err(IpcError::Config(format!("socket {} declared twice", spec.name)));
        }
        let endpoint = spec.endpoint(&config.host)?;
        match spec.kind() {
            SocketKind::Publisher => {
                let socket = IpcSocket::publisher(spec.name.clone(), endpoint, opts).await?;
                publishers.insert(spec.name.clone(), socket);
            }
            SocketKind::Subscriber => {
                let socket =
                    IpcSocket::subscriber(spec.name.clone(), endpoint, &spec.topics, opts).await?;
                subscribers.insert(spec.name.clone(), socket);
            }
        }
    }
    let (shutdown, _) = broadcast::channel(16);
    let ctx = AppContext {
        inner: Arc::new(ContextInner {
            app_name: app_name.to_owned(),
            serializer: Serializer::from_config(config),
            publishers,
            metrics,
            shutdown,
            stopping: AtomicBool::new(false),
        }),
    };
    Ok((ctx, subscribers))
}

fn detached_metrics() -> Result<PipelineMetrics> {
    PipelineMetrics::detached().map_err(|err| IpcError::Config(err.to_string()))
}

/// Async app manager: one task per subscriber socket.
pub struct AppManager {
    ctx: AppContext,
    subscribers: HashMap<String, IpcSocket>,
    routes: Vec<(IpcSocket, SocketHandler)>,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
    join_timeout: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl std::fmt::Debug for AppManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppManager")
            .field("ctx", &self.ctx)
            .field("unattached", &self.subscribers.keys().collect::<Vec<_>>())
            .field("routes", &self.routes.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl AppManager {
    /// Open every socket in `specs`.
    pub async fn open(app_name: &str, config: &IpcConfig, specs: &[SocketSpec]) -> Result<Self> {
        Self::open_with_metrics(app_name, config, specs, detached_metrics()?).await
    }

    /// Open every socket in `specs`, counting traffic into `metrics`.
    pub async fn open_with_metrics(
        app_name: &str,
        config: &IpcConfig,
        specs: &[SocketSpec],
        metrics: PipelineMetrics,
    ) -> Result<Self> {
        let (ctx, subscribers) = open_sockets(app_name, config, specs, metrics).await?;
        let shutdown_rx = ctx.subscribe_shutdown();
        info!(app = app_name, sockets = specs.len(), "app manager ready");
        Ok(Self {
            ctx,
            subscribers,
            routes: Vec::new(),
            tasks: Vec::new(),
            join_timeout: config.join_timeout,
            shutdown_rx,
        })
    }

    /// Shared context for handlers and background tasks.
    pub fn context(&self) -> AppContext {
        self.ctx.clone()
    }

    /// Route payloads of subscriber `socket` to `handler`.
    pub fn attach(&mut self, socket: &str, handler: &dyn SocketTopicHandler) -> Result<()> {
        let sock = self
            .subscribers
            .remove(socket)
            .ok_or_else(|| IpcError::Config(format!("no unattached subscriber named {socket}")))?;
        let handler = SocketHandler::new(handler);
        debug!(app = self.ctx.app_name(), socket, ?handler, "handler attached");
        self.routes.push((sock, handler));
        Ok(())
    }

    /// Run a background task alongside the socket tasks. It receives the
    /// context and a shutdown receiver and is joined like the others.
    pub fn spawn<F, Fut>(&mut self, name: &str, task: F)
    where
        F: FnOnce(AppContext, broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let fut = task(self.ctx.clone(), self.ctx.subscribe_shutdown());
        self.tasks.push((name.to_owned(), tokio::spawn(fut)));
    }

    /// Run until a handler or the bus asks the app to stop.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `signal` completes or the app is asked to stop, then join
    /// every task within the configured timeout.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<()> {
        for name in self.subscribers.keys() {
            warn!(app = self.ctx.app_name(), socket = %name, "subscriber has no handler");
        }
        for (socket, handler) in std::mem::take(&mut self.routes) {
            let name = socket.name().to_owned();
            let ctx = self.ctx.clone();
            let shutdown = ctx.subscribe_shutdown();
            self.tasks
                .push((name, tokio::spawn(serve_socket(ctx, socket, handler, shutdown))));
        }
        info!(app = self.ctx.app_name(), tasks = self.tasks.len(), "app running");

        if !self.ctx.is_shutting_down() {
            tokio::select! {
                _ = signal => info!(app = self.ctx.app_name(), "shutdown signal received"),
                _ = self.shutdown_rx.recv() => {}
            }
        }
        self.ctx.request_shutdown();
        self.join().await
    }

    async fn join(self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.join_timeout;
        let mut first_failure = None;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => debug!(task = %name, "task stopped"),
                Ok(Ok(Err(err))) => {
                    error!(task = %name, error = %err, "task failed");
                    first_failure.get_or_insert(err);
                }
                Ok(Err(err)) => error!(task = %name, error = %err, "task panicked or was cancelled"),
                Err(_) => {
                    warn!(task = %name, "task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        info!(app = self.ctx.app_name(), "app stopped");
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn serve_socket(
    ctx: AppContext,
    mut socket: IpcSocket,
    handler: SocketHandler,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            received = socket.recv() => received,
        };
        let payload = match received {
            Ok(payload) => payload,
            Err(err) => {
                ctx.request_shutdown();
                return Err(err);
            }
        };
        match handle_payload(&ctx, &handler, payload).await {
            Ok(()) => {}
            Err(err) if err.is_end_app_request() => {
                info!(socket = socket.name(), reason = %err, "handler asked the app to stop");
                ctx.request_shutdown();
                break;
            }
            Err(err @ IpcError::UnhandledTopic(_)) => {
                ctx.request_shutdown();
                return Err(err);
            }
            Err(err) => warn!(socket = socket.name(), error = %err, "payload handling failed"),
        }
    }
    debug!(socket = socket.name(), stats = ?socket.stats(), "socket task stopping");
    socket.close();
    Ok(())
}

/// Blocking app manager for single-loop apps. Background socket I/O runs
/// on an owned single-worker runtime.
pub struct AppManagerSync {
    ctx: AppContext,
    subscribers: HashMap<String, IpcSocket>,
    poll_interval: Duration,
    // Dropped last so the sockets above can still abort their tasks.
    runtime: Runtime,
}

impl std::fmt::Debug for AppManagerSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppManagerSync")
            .field("ctx", &self.ctx)
            .field("subscribers", &self.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AppManagerSync {
    /// Open every socket in `specs`. Must not be called from async code.
    pub fn open(app_name: &str, config: &IpcConfig, specs: &[SocketSpec]) -> Result<Self> {
        Self::open_with_metrics(app_name, config, specs, detached_metrics()?)
    }

    /// Open every socket in `specs`, counting traffic into `metrics`.
    pub fn open_with_metrics(
        app_name: &str,
        config: &IpcConfig,
        specs: &[SocketSpec],
        metrics: PipelineMetrics,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("{app_name}-io"))
            .enable_all()
            .build()?;
        let (ctx, subscribers) =
            runtime.block_on(open_sockets(app_name, config, specs, metrics))?;
        info!(app = app_name, sockets = specs.len(), "sync app manager ready");
        Ok(Self {
            ctx,
            subscribers,
            poll_interval: config.poll_interval,
            runtime,
        })
    }

    /// Shared context.
    pub fn context(&self) -> AppContext {
        self.ctx.clone()
    }

    /// Request shutdown on SIGINT or SIGTERM.
    pub fn install_signal_handler(&self) {
        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.request_shutdown();
            }
        });
        #[cfg(unix)]
        {
            let ctx = self.ctx.clone();
            self.runtime.spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut term) = signal(SignalKind::terminate()) {
                    term.recv().await;
                    ctx.request_shutdown();
                }
            });
        }
    }

    /// Next payload on `socket`. Blocks, waking every poll interval to
    /// honour shutdown, which surfaces as [`IpcError::EndAppRequest`].
    pub fn read(&mut self, socket: &str) -> Result<IpcPayload> {
        loop {
            if self.ctx.is_shutting_down() {
                return Err(IpcError::EndAppRequest("shutdown requested".to_owned()));
            }
            if let Some(payload) = self.read_timeout(socket, self.poll_interval)? {
                return Ok(payload);
            }
        }
    }

    /// Next payload on `socket`, or `None` after `wait`.
    pub fn read_timeout(&mut self, socket: &str, wait: Duration) -> Result<Option<IpcPayload>> {
        let sock = self
            .subscribers
            .get_mut(socket)
            .ok_or_else(|| IpcError::Config(format!("no subscriber socket named {socket}")))?;
        let received = self.runtime.block_on(sock.recv_timeout(wait))?;
        if let Some(payload) = &received {
            self.ctx.metrics().record_ipc(&topic_label(payload), "rx");
            if let Err(err) = apply_app_control(&self.ctx, payload) {
                if err.is_end_app_request() {
                    self.ctx.request_shutdown();
                }
                return Err(err);
            }
        }
        Ok(received)
    }

    /// See [`AppContext::send_to`].
    pub fn send_to(
        &self,
        socket: &str,
        content: impl Into<MessageContent>,
        subtopic: &[u8],
    ) -> Result<()> {
        self.ctx.send_to(socket, content, subtopic)
    }

    /// See [`AppContext::decode`].
    pub fn decode(&self, payload: &IpcPayload) -> Result<MessageContent> {
        self.ctx.decode(payload)
    }

    /// Drive `fut` on the manager's runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Close every socket.
    pub fn close(&mut self) {
        for (_, mut socket) in self.subscribers.drain() {
            socket.close();
        }
        info!(app = self.ctx.app_name(), "sync app manager closed");
    }
}
