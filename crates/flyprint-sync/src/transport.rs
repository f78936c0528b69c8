//! # Realtime Channel
//!
//! Authenticated WebSocket connection to the cloud with a fixed-interval
//! reconnect loop, keepalive pings and typed inbound dispatch.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Realtime Channel States                              │
//! │                                                                         │
//! │  ┌────────────┐   token + upgrade   ┌────────────┐                     │
//! │  │Disconnected│ ──────────────────► │ Connecting │                     │
//! │  └────────────┘                     └─────┬──────┘                     │
//! │        ▲                                  │                             │
//! │        │                        success   │   failure (no token,        │
//! │        │                     ┌────────────┤   refused, timeout)         │
//! │        │                     ▼            │                             │
//! │        │              ┌────────────┐      │                             │
//! │        │              │ Connected  │      │                             │
//! │        │              └─────┬──────┘      │                             │
//! │        │     close / error / pong timeout │                             │
//! │        │                    ▼             ▼                             │
//! │        │              ┌──────────────────────┐                          │
//! │        └───────────── │ wait reconnect (5s)  │                          │
//! │                       └──────────────────────┘                          │
//! │                                                                         │
//! │  RECONNECT STRATEGY: constant interval, no growth, no jitter           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outbound Path
//! Producers hold an [`OutboundSender`] (a [`MessageSink`]). Messages go into
//! a bounded queue that only the connection task drains, so there is a single
//! writer. Messages queued while disconnected are written after the next
//! successful connect; a full queue rejects the new message.

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::auth::TokenManager;
use crate::config::RealtimeSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{InboundMessage, OutboundMessage, PrintJobRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Channel State
// =============================================================================

/// Connection state of the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, or waiting to reconnect.
    Disconnected,
    /// Fetching a token or performing the upgrade.
    Connecting,
    /// Connected and ready.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Configuration for the realtime channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws(s)://.../api/v1/edge/ws?node_id=...`
    pub url: String,

    /// Connection (upgrade) timeout.
    pub connect_timeout: Duration,

    /// Fixed wait between connection attempts.
    pub reconnect_interval: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,

    /// Pong timeout (disconnect if no pong received).
    pub pong_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>, settings: &RealtimeSettings) -> Self {
        ChannelConfig {
            url: url.into(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            reconnect_interval: Duration::from_secs(settings.reconnect_interval_secs),
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            pong_timeout: Duration::from_secs(settings.pong_timeout_secs),
        }
    }
}

// =============================================================================
// Outbound Queue
// =============================================================================

/// Capability to push a message towards the cloud.
///
/// Never blocks. An error means the message was not accepted.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: OutboundMessage) -> SyncResult<()>;
}

/// Producer side of the outbound queue.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundMessage>,
}

/// Consumer side of the outbound queue, owned by the connection task.
pub struct OutboundReceiver {
    rx: mpsc::Receiver<OutboundMessage>,
}

/// Creates the bounded outbound queue.
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx })
}

impl OutboundSender {
    /// Messages waiting to be written.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl MessageSink for OutboundSender {
    fn send(&self, message: OutboundMessage) -> SyncResult<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    msg_type = message.type_name(),
                    capacity = self.tx.max_capacity(),
                    "Outbound queue full, dropping message"
                );
                Err(SyncError::QueueFull(self.tx.max_capacity()))
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                debug!(msg_type = message.type_name(), "Realtime channel stopped, dropping message");
                Err(SyncError::ChannelError("realtime channel is stopped".into()))
            }
        }
    }
}

// =============================================================================
// Inbound Dispatch
// =============================================================================

/// Receives `print_job` messages.
#[async_trait]
pub trait PrintJobHandler: Send + Sync {
    async fn handle_print_job(&self, request: PrintJobRequest);
}

/// Handlers per inbound message kind.
#[derive(Clone, Default)]
pub struct Handlers {
    print_job: Option<Arc<dyn PrintJobHandler>>,
    tracker: Option<TaskTracker>,
    intake: CancellationToken,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_print_job(mut self, handler: Arc<dyn PrintJobHandler>) -> Self {
        self.print_job = Some(handler);
        self
    }

    /// Spawns handler tasks on `tracker` so their owner can wait for them.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Stops dispatching. Shared by every clone.
    pub fn close_intake(&self) {
        self.intake.cancel();
    }

    pub fn is_accepting(&self) -> bool {
        !self.intake.is_cancelled()
    }

    /// Routes one message to its handler on a separate task.
    ///
    /// Returns false if nothing handles it or intake is closed.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        if !self.is_accepting() {
            debug!(msg_type = %message.type_name(), "Intake closed, dropping message");
            return false;
        }
        match message {
            InboundMessage::PrintJob(request) => match &self.print_job {
                Some(handler) => {
                    let handler = handler.clone();
                    let task = async move { handler.handle_print_job(request).await };
                    match &self.tracker {
                        Some(tracker) => {
                            tracker.spawn(task);
                        }
                        None => {
                            tokio::spawn(task);
                        }
                    }
                    true
                }
                None => {
                    debug!("No print_job handler registered, dropping message");
                    false
                }
            },
            InboundMessage::Unknown { kind } => {
                debug!(msg_type = %kind, "Unhandled message type, dropping");
                false
            }
        }
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

#[derive(Debug, Default)]
struct ChannelStats {
    connection_attempts: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
}

/// Snapshot of the channel for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub running: bool,
    pub url: String,
    pub connection_attempts: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub queued: usize,
}

/// Owner's handle on a running channel.
pub struct ChannelHandle {
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<ChannelStats>,
    sender: OutboundSender,
    intake: Handlers,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub async fn status(&self) -> ChannelStatus {
        ChannelStatus {
            state: self.state().await,
            running: self.is_running(),
            url: self.url.clone(),
            connection_attempts: self.stats.connection_attempts.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            queued: self.sender.queued(),
        }
    }

    /// Stops dispatching inbound messages. The connection stays up, so
    /// queued outbound messages are still written.
    pub fn close_intake(&self) {
        self.intake.close_intake();
    }

    /// Stops the reconnect loop and waits for it to exit. Messages already
    /// queued are flushed on the open connection first. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Realtime channel task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Realtime Channel
// =============================================================================

/// WebSocket channel with fixed-interval reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let (sender, receiver) = outbound_queue(100);
/// let handlers = Handlers::new().on_print_job(pipeline.clone());
/// let channel = RealtimeChannel::spawn(config, tokens, handlers, sender, receiver);
///
/// sender.send(OutboundMessage::printer_status(&node_id, &snapshot))?;
/// channel.stop().await;
/// ```
pub struct RealtimeChannel {
    config: ChannelConfig,
    tokens: Arc<TokenManager>,
    handlers: Handlers,
    outgoing: OutboundReceiver,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<ChannelStats>,
    cancel: CancellationToken,
}

impl RealtimeChannel {
    /// Spawns the reconnect loop and returns its handle.
    pub fn spawn(
        config: ChannelConfig,
        tokens: Arc<TokenManager>,
        handlers: Handlers,
        sender: OutboundSender,
        outgoing: OutboundReceiver,
    ) -> ChannelHandle {
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let stats = Arc::new(ChannelStats::default());
        let cancel = CancellationToken::new();
        let url = config.url.clone();

        let intake = handlers.clone();
        let channel = RealtimeChannel {
            config,
            tokens,
            handlers,
            outgoing,
            state: state.clone(),
            stats: stats.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(channel.run());

        ChannelHandle {
            url,
            state,
            stats,
            sender,
            intake,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Main reconnect loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Realtime channel starting");
        let mut backoff = Constant::new(self.config.reconnect_interval);

        while !self.cancel.is_cancelled() {
            *self.state.write().await = ConnectionState::Connecting;
            self.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);

            match self.connect().await {
                Ok(ws_stream) => {
                    info!("Realtime channel connected");
                    *self.state.write().await = ConnectionState::Connected;

                    if let Err(e) = self.connection_loop(ws_stream).await {
                        warn!(error = %e, "Realtime connection lost");
                    }
                }
                Err(e) if e.is_auth_error() => {
                    warn!(error = %e, "No access token for realtime channel");
                }
                Err(e) => {
                    error!(error = %e, "Realtime connect failed");
                }
            }

            *self.state.write().await = ConnectionState::Disconnected;

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect_interval);
            debug!(?delay, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Realtime channel stopped");
    }

    /// Fetches a token and performs the authenticated upgrade.
    async fn connect(&self) -> SyncResult<WsStream> {
        let token = self.tokens.get_token().await?;

        let mut request = self.config.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&token.bearer())
            .map_err(|_| SyncError::AuthFailed("access token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match timeout(self.config.connect_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Connection loop: single writer for the queue, reader, keepalive.
    async fn connection_loop(&mut self, ws_stream: WsStream) -> SyncResult<()> {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = tokio::time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            let pong_wait = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                // Drain the outbound queue
                Some(msg) = self.outgoing.rx.recv() => {
                    let json = msg.to_json()?;
                    debug!(msg_type = msg.type_name(), "Sending message");
                    write.send(WsMessage::Text(json.into())).await?;
                    self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                }

                // Handle incoming frames
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            match InboundMessage::from_json(&text) {
                                Ok(msg) => {
                                    debug!(msg_type = %msg.type_name(), "Received message");
                                    self.handlers.dispatch(msg);
                                }
                                Err(e) => {
                                    warn!(error = %e, "Failed to parse message");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            debug!("Received pong");
                            pong_deadline = None;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            return Ok(());
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!("Received unexpected binary message");
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(e)) => {
                            return Err(SyncError::from(e));
                        }
                        None => {
                            info!("Realtime stream ended");
                            return Ok(());
                        }
                    }
                }

                // Keepalive
                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(vec![].into())).await?;
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                    debug!("Sent ping");
                }

                _ = pong_wait => {
                    warn!(timeout = ?self.config.pong_timeout, "Pong not received in time");
                    return Err(SyncError::Timeout(self.config.pong_timeout.as_secs()));
                }

                _ = self.cancel.cancelled() => {
                    info!("Stop requested, closing realtime connection");
                    while let Ok(msg) = self.outgoing.rx.try_recv() {
                        let json = msg.to_json()?;
                        if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                            warn!(error = %e, "Queued messages not flushed");
                            break;
                        }
                        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}
