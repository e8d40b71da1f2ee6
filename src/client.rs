//! Live Session Controller
//!
//! Owns the WebSocket and drives the full lifecycle: token acquisition,
//! connect, registry replay, frame dispatch, self-healing reconnect with
//! backoff, periodic token refresh on long-lived sessions, and graceful
//! shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Init ──► Authenticating ──► Connecting ──► Ready
//!   ▲            │                 │            │
//!   │            └── fail ─► Backoff ◄── close/error
//!   │                                      │
//!   └────────── stop() from any state ─► Stopped
//! ```
//!
//! The session task is the only reader and the only writer of the socket;
//! user calls travel to it over a command channel, which serializes all
//! outbound traffic. Callbacks run on the session task and must be short;
//! hand heavy work to your own queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthClient;
use crate::backoff::{BackoffSchedule, retry_with_backoff};
use crate::codec;
use crate::config::{Config, ConfigError, Credentials};
use crate::messages::{Quote, StreamMessage, Trade};
use crate::subscription::{AddOutcome, SubscriptionEntry, SubscriptionRegistry};

/// Callback invoked for every decoded trade.
pub type TradeHandler = Arc<dyn Fn(Trade) + Send + Sync>;

/// Callback invoked for every decoded quote.
pub type QuoteHandler = Arc<dyn Fn(Quote) + Send + Sync>;

/// A token older than this is re-acquired at the next reconnect boundary.
const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// How long shutdown waits for the server to acknowledge the close frame.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the user-command channel.
const COMMAND_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Public Types
// =============================================================================

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, session task not yet running.
    Init,
    /// Acquiring a session token.
    Authenticating,
    /// Opening the WebSocket.
    Connecting,
    /// Streaming; joins flow immediately.
    Ready,
    /// Waiting out the backoff schedule after a failure.
    Reconnecting,
    /// Terminal: `stop()` was called, the server closed normally, or the
    /// handle was dropped.
    Stopped,
}

/// Errors surfaced by the public session API.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has stopped; no further operations are possible.
    #[error("session is stopped")]
    Stopped,

    /// WebSocket-level failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection closed without a normal close handshake.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,
}

/// User requests forwarded to the session task, which serializes all
/// socket writes.
#[derive(Debug)]
enum Command {
    Join { channel: String, trades_only: bool },
    Leave { channel: String },
    LeaveAll,
}

/// How a connection ended, when it ended on purpose.
enum SessionEnd {
    /// `stop()` or handle drop; leaves sent, closed with 1000.
    Stopped,
    /// The server closed with code 1000; terminal for this session.
    ServerClosed,
}

// =============================================================================
// Client
// =============================================================================

/// Handle to a live streaming session.
///
/// Constructed with [`Client::start`], which spawns the session task and
/// returns immediately; use [`Client::join`] to subscribe and
/// [`Client::stop`] to end the session. Dropping the handle without
/// calling `stop()` also shuts the session down, but without the graceful
/// leave-and-close exchange.
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    registry: Arc<SubscriptionRegistry>,
    frames_received: Arc<AtomicU64>,
    default_trades_only: bool,
    stop_called: AtomicBool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("channels", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Construct and start a session.
    ///
    /// `on_trade` is required. When `on_quote` is absent, the client-wide
    /// trades-only default is forced on, so the server never sends quotes.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty access key, a `MANUAL` provider
    /// without a host, or an unbuildable HTTP client. Everything after
    /// construction self-heals instead of erroring.
    pub fn start(
        access_key: impl Into<String>,
        on_trade: TradeHandler,
        on_quote: Option<QuoteHandler>,
        config: Config,
    ) -> Result<Self, ConfigError> {
        let credentials = Credentials::new(access_key)?;
        config.validate()?;

        let default_trades_only = config.trades_only || on_quote.is_none();
        let auth = AuthClient::new(credentials, &config)?;
        let registry = Arc::new(SubscriptionRegistry::new());
        let frames_received = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Init);
        let cancel = CancellationToken::new();

        if config.handle_shutdown_signal && !config.is_public_key {
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received Ctrl+C, stopping session");
                    signal_cancel.cancel();
                }
            });
        }

        tracing::info!(
            provider = %config.provider,
            trades_only = default_trades_only,
            delayed = config.delayed,
            "starting session"
        );

        let task = SessionTask {
            client_info: crate::client_information(),
            config,
            auth,
            handlers: Handlers { on_trade, on_quote },
            registry: Arc::clone(&registry),
            cmd_rx,
            state_tx,
            cancel: cancel.clone(),
            frames_received: Arc::clone(&frames_received),
            token: None,
            last_ready_at: None,
        };
        tokio::spawn(task.run());

        Ok(Self {
            cmd_tx,
            state_rx,
            cancel,
            registry,
            frames_received,
            default_trades_only,
            stop_called: AtomicBool::new(false),
        })
    }

    /// Subscribe to channels using the client-wide trades-only default.
    ///
    /// Waits until the session is `Ready`. Idempotent per channel; the
    /// first call's flag wins. Invalid channels are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Stopped`] if the session has ended.
    pub async fn join<I, S>(&self, symbols: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_with(symbols, false).await
    }

    /// Subscribe to channels with an explicit per-call trades-only flag.
    ///
    /// The effective flag is the OR of this flag and the client-wide
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Stopped`] if the session has ended.
    pub async fn join_with<I, S>(&self, symbols: I, trades_only: bool) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.await_ready().await?;
        let effective = trades_only || self.default_trades_only;

        for symbol in symbols {
            let channel = symbol.into();
            self.cmd_tx
                .send(Command::Join {
                    channel,
                    trades_only: effective,
                })
                .await
                .map_err(|_| SessionError::Stopped)?;
        }
        Ok(())
    }

    /// Subscribe to a single channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Stopped`] if the session has ended.
    pub async fn join_one(&self, symbol: &str, trades_only: bool) -> Result<(), SessionError> {
        self.join_with([symbol], trades_only).await
    }

    /// Unsubscribe from channels. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Stopped`] if the session has ended.
    pub async fn leave<I, S>(&self, symbols: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for symbol in symbols {
            self.cmd_tx
                .send(Command::Leave {
                    channel: symbol.into(),
                })
                .await
                .map_err(|_| SessionError::Stopped)?;
        }
        Ok(())
    }

    /// Unsubscribe from every registered channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Stopped`] if the session has ended.
    pub async fn leave_all(&self) -> Result<(), SessionError> {
        self.cmd_tx
            .send(Command::LeaveAll)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    /// Leave every channel, drain outbound traffic, close with code 1000,
    /// and wait for the session task to finish.
    ///
    /// Call exactly once; later calls log a warning and return.
    pub async fn stop(&self) {
        if self.stop_called.swap(true, Ordering::SeqCst) {
            tracing::warn!("stop() called more than once");
            return;
        }

        tracing::info!("stopping session");
        self.cancel.cancel();

        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == SessionState::Stopped {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Count of inbound WebSocket messages (frames, not sub-messages).
    #[must_use]
    pub fn total_msg_count(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Snapshot of the registered channels in registration order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.registry.snapshot()
    }

    /// Wait until the session reports `Ready`.
    async fn await_ready(&self) -> Result<(), SessionError> {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                SessionState::Ready => return Ok(()),
                SessionState::Stopped => return Err(SessionError::Stopped),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(SessionError::Stopped);
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Without this, dropping the last handle would leave the session
        // task streaming forever.
        self.cancel.cancel();
    }
}

/// Token reuse rule: a reconnect reuses the existing token unless more
/// than [`TOKEN_LIFETIME`] has passed since the last successful
/// connection. A token that never reached `Ready` is reused as-is.
fn token_is_stale(last_ready_at: Option<tokio::time::Instant>, now: tokio::time::Instant) -> bool {
    last_ready_at.is_some_and(|ready_at| now.duration_since(ready_at) > TOKEN_LIFETIME)
}

// =============================================================================
// Session Task
// =============================================================================

struct Handlers {
    on_trade: TradeHandler,
    on_quote: Option<QuoteHandler>,
}

/// The single task that owns the socket for one session.
struct SessionTask {
    client_info: String,
    config: Config,
    auth: AuthClient,
    handlers: Handlers,
    registry: Arc<SubscriptionRegistry>,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    frames_received: Arc<AtomicU64>,
    token: Option<String>,
    last_ready_at: Option<tokio::time::Instant>,
}

impl SessionTask {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Whether a fresh token must be acquired before connecting.
    fn needs_token(&self) -> bool {
        self.token.is_none()
            || token_is_stale(self.last_ready_at, tokio::time::Instant::now())
    }

    async fn run(mut self) {
        let mut backoff = BackoffSchedule::new(self.config.reconnect_schedule.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.needs_token() {
                self.set_state(SessionState::Authenticating);
                let auth = &self.auth;
                let Some(token) =
                    retry_with_backoff(&mut backoff, &self.cancel, "token acquisition", || {
                        auth.fetch_token()
                    })
                    .await
                else {
                    break;
                };
                self.token = Some(token);
            }

            self.set_state(SessionState::Connecting);
            let token = self.token.clone().unwrap_or_default();

            match self.connect_and_run(&token, &mut backoff).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::ServerClosed) => {
                    tracing::info!("server closed the session normally");
                    break;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "connection lost");
                    self.set_state(SessionState::Reconnecting);

                    let delay = backoff.next_delay();
                    tracing::info!(
                        attempt = backoff.attempts(),
                        delay_secs = delay.as_secs(),
                        "self-heal backoff before reconnect"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(SessionState::Stopped);
        tracing::info!("session stopped");
    }

    /// Open the socket and stream until an error, a close, or shutdown.
    async fn connect_and_run(
        &mut self,
        token: &str,
        backoff: &mut BackoffSchedule,
    ) -> Result<SessionEnd, SessionError> {
        let url = self.config.provider.websocket_url(
            self.config.manual_host(),
            token,
            &self.client_info,
            self.config.delayed,
        );
        tracing::info!(provider = %self.config.provider, "connecting");

        let mut request = url.into_client_request()?;
        if let Ok(value) = HeaderValue::from_str(&self.client_info) {
            request.headers_mut().insert("Client-Information", value);
        }
        request
            .headers_mut()
            .insert("UseNewEquitiesFormat", HeaderValue::from_static("v2"));

        let (socket, _response) = connect_async(request).await?;
        let (mut write, mut read) = socket.split();

        // Ready: reconcile the server with the registry, oldest entry first.
        self.set_state(SessionState::Ready);
        self.last_ready_at = Some(tokio::time::Instant::now());
        backoff.reset();

        let snapshot = self.registry.snapshot();
        if !snapshot.is_empty() {
            tracing::info!(channels = snapshot.len(), "replaying subscriptions");
        }
        for entry in snapshot {
            write
                .send(Message::Binary(
                    codec::join_frame(&entry.channel, entry.trades_only).into(),
                ))
                .await?;
        }

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut commands_closed = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.shutdown_socket(&mut write, &mut read).await;
                    return Ok(SessionEnd::Stopped);
                }
                command = self.cmd_rx.recv(), if !commands_closed => {
                    match command {
                        Some(command) => self.handle_command(command, &mut write).await?,
                        None => {
                            tracing::debug!("client handle dropped, shutting down");
                            commands_closed = true;
                            self.cancel.cancel();
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Binary(Bytes::from_static(codec::HEARTBEAT_PAYLOAD)))
                        .await?;
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Binary(data))) => {
                            self.frames_received.fetch_add(1, Ordering::Relaxed);
                            self.dispatch_frame(&data);
                        }
                        Some(Ok(Message::Text(text))) => {
                            self.frames_received.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(len = text.len(), "ignoring text message");
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            if code == Some(1000) {
                                return Ok(SessionEnd::ServerClosed);
                            }
                            tracing::warn!(?code, "server closed the connection");
                            return Err(SessionError::ConnectionClosed);
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => {
                            tracing::warn!("socket stream ended");
                            return Err(SessionError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Apply one user command; all socket writes stay on this task.
    async fn handle_command(
        &self,
        command: Command,
        write: &mut WsSink,
    ) -> Result<(), SessionError> {
        match command {
            Command::Join {
                channel,
                trades_only,
            } => match self.registry.add(&channel, trades_only) {
                AddOutcome::Added => {
                    tracing::info!(channel = %channel, trades_only, "joining channel");
                    write
                        .send(Message::Binary(
                            codec::join_frame(&channel, trades_only).into(),
                        ))
                        .await?;
                }
                AddOutcome::AlreadyPresent | AddOutcome::Rejected => {}
            },
            Command::Leave { channel } => {
                if self.registry.remove(&channel) {
                    tracing::info!(channel = %channel, "leaving channel");
                    write
                        .send(Message::Binary(codec::leave_frame(&channel).into()))
                        .await?;
                } else {
                    tracing::debug!(channel = %channel, "leave for unregistered channel ignored");
                }
            }
            Command::LeaveAll => {
                for entry in self.registry.snapshot() {
                    self.registry.remove(&entry.channel);
                    tracing::info!(channel = %entry.channel, "leaving channel");
                    write
                        .send(Message::Binary(codec::leave_frame(&entry.channel).into()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Decode one inbound frame and invoke callbacks in sub-message order.
    fn dispatch_frame(&self, frame: &[u8]) {
        match codec::parse_frame(frame) {
            Ok(messages) => {
                for message in messages {
                    match message {
                        StreamMessage::Trade(trade) => (self.handlers.on_trade)(trade),
                        StreamMessage::Quote(quote) => {
                            if let Some(on_quote) = &self.handlers.on_quote {
                                on_quote(quote);
                            } else {
                                tracing::trace!("dropping quote: no quote handler");
                            }
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "malformed frame");
            }
        }
    }

    /// Graceful close: one leave per registered channel, flush, close with
    /// code 1000, then drain until the server acknowledges.
    async fn shutdown_socket(&self, write: &mut WsSink, read: &mut WsSource) {
        for entry in self.registry.snapshot() {
            tracing::debug!(channel = %entry.channel, "leaving channel on shutdown");
            if let Err(error) = write
                .send(Message::Binary(codec::leave_frame(&entry.channel).into()))
                .await
            {
                tracing::debug!(error = %error, "socket already gone during shutdown");
                return;
            }
        }

        if let Err(error) = write.flush().await {
            tracing::debug!(error = %error, "flush failed during shutdown");
        }

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        if let Err(error) = write.send(close).await {
            tracing::debug!(error = %error, "close frame failed during shutdown");
            return;
        }

        let drain = async {
            while let Some(message) = read.next().await {
                if message.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain)
            .await
            .is_err()
        {
            tracing::debug!("shutdown drain timed out");
        }
    }
}
