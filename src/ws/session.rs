#![allow(missing_docs)]
//! Streaming session: connection lifecycle, read loop and reconnect policy.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──connect()──▶ Connecting ──ok──▶ Connected
//!                           │                  │ read failure
//!                        failure               ▼
//!                           │            Disconnected ──retry──▶ Connecting
//!                           ▼                  │
//!                      Disconnected     attempts exhausted / close()
//!                                              ▼
//!                                        Disconnected (terminal)
//! ```
//!
//! Each successful connect starts two tasks tagged with a connection
//! *generation*: the read loop and the heartbeat. A task whose generation is no
//! longer current exits on its next wake-up, so a stale task never acts on a
//! newer connection.
//!
//! # Locking
//!
//! Session state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Socket writes go through a separate async mutex around
//! the sink, so heartbeat probes and control frames never interleave.
//!
//! # Quick Start
//!
//! ```no_run
//! use smartstream_rs::credentials::Credentials;
//! use smartstream_rs::types::enums::{ExchangeType, SubscriptionMode};
//! use smartstream_rs::ws::events::FeedMessage;
//! use smartstream_rs::ws::subscription::TokenSet;
//! use smartstream_rs::FeedSession;
//!
//! # #[tokio::main]
//! # async fn main() -> smartstream_rs::Result<()> {
//! let session = FeedSession::new(Credentials::from_env()?, Default::default())?;
//!
//! session.handlers().on_message(|msg| {
//!     if let FeedMessage::Tick(tick) = msg {
//!         println!("{} @ {}", tick.header().token, tick.header().last_traded_price);
//!     }
//! });
//! session.handlers().on_no_reconnect(|| eprintln!("feed gave up reconnecting"));
//!
//! session.connect().await?;
//! session
//!     .subscribe(
//!         "watchlist",
//!         SubscriptionMode::Quote,
//!         vec![TokenSet::new(ExchangeType::NSE_CM, ["2885", "1594"])],
//!     )
//!     .await?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use crate::constants::{HEARTBEAT_MESSAGE, HEARTBEAT_REPLY, RESUBSCRIBE_CORRELATION_ID};
use crate::credentials::Credentials;
use crate::error::{Result, StreamError};
use crate::types::enums::SubscriptionMode;
use crate::ws::config::{FeedConfig, FeedSessionBuilder};
use crate::ws::events::{Dispatcher, EventHandlers, FeedMessage, SessionEvent};
use crate::ws::heartbeat::{self, HeartbeatTarget, Liveness};
use crate::ws::market_feed::parse_packet;
use crate::ws::subscription::{SubscriptionRegistry, TokenSet};
use crate::ws::tls;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WriterHalf = SplitSink<WsStream, Message>;
type ReaderHalf = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Connection phase of a [`FeedSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A handshake is in flight.
    Connecting,
    /// The socket is live.
    Connected,
    /// The socket is gone. Terminal after `close()` or retry exhaustion.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Everything guarded by the session lock.
#[derive(Debug)]
struct SessionState {
    phase: ConnectionState,
    closed_by_caller: bool,
    /// A read failure is being handled; `connect()` must not race it.
    reconnecting: bool,
    generation: u64,
    current_attempt: u32,
    registry: SubscriptionRegistry,
    liveness: Liveness,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    credentials: Credentials,
    config: FeedConfig,
    state: Mutex<SessionState>,
    writer: tokio::sync::Mutex<Option<WriterHalf>>,
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// FeedSession
// ---------------------------------------------------------------------------

/// A live-feed session. Cheap to clone; clones share the same connection.
///
/// Background tasks keep running until [`close`](Self::close) is called, the
/// retry policy gives up, or the last clone is dropped. Dropping skips the
/// close frame and the on-close event.
#[derive(Clone)]
pub struct FeedSession {
    inner: Arc<Shared>,
    _owner: Arc<OwnerGuard>,
}

/// Held only by [`FeedSession`] clones. Background tasks keep `Shared` alive,
/// so teardown hangs off this guard instead.
struct OwnerGuard {
    shared: Arc<Shared>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let tasks = {
            let mut st = self.shared.lock_state();
            st.closed_by_caller = true;
            st.reconnecting = false;
            st.phase = ConnectionState::Disconnected;
            std::mem::take(&mut st.tasks)
        };
        self.shared.shutdown.send_replace(true);
        for task in tasks {
            task.abort();
        }
        if let Ok(mut writer) = self.shared.writer.try_lock() {
            writer.take();
        }
        tracing::debug!(
            client_code = %self.shared.credentials.client_code(),
            "Feed session dropped"
        );
    }
}

impl std::fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock_state();
        f.debug_struct("FeedSession")
            .field("client_code", &self.inner.credentials.client_code())
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &st.phase)
            .field("generation", &st.generation)
            .field("subscribed_tokens", &st.registry.total_tokens())
            .finish()
    }
}

impl FeedSession {
    /// Start building a session with custom configuration.
    pub fn builder(credentials: Credentials) -> FeedSessionBuilder {
        FeedSessionBuilder::new(credentials)
    }

    /// Create an idle session. Nothing touches the network until
    /// [`connect`](Self::connect).
    pub fn new(credentials: Credentials, config: FeedConfig) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::new(Arc::new(EventHandlers::default()), config.dispatch)?;
        let (shutdown, _) = watch::channel(false);

        let state = SessionState {
            phase: ConnectionState::Idle,
            closed_by_caller: false,
            reconnecting: false,
            generation: 0,
            current_attempt: 0,
            registry: SubscriptionRegistry::with_quota(config.quota),
            liveness: Liveness::default(),
            tasks: Vec::new(),
        };

        let inner = Arc::new(Shared {
            credentials,
            config,
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(None),
            dispatcher,
            shutdown,
        });
        Ok(Self {
            _owner: Arc::new(OwnerGuard {
                shared: inner.clone(),
            }),
            inner,
        })
    }

    /// Callback slots. Register before [`connect`](Self::connect) to see the
    /// first on-connect event.
    pub fn handlers(&self) -> &EventHandlers {
        self.inner.dispatcher.handlers()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// Open the socket and start the read loop and heartbeat.
    ///
    /// On failure the error is reported through on-error as well as
    /// returned. Calling `connect` again after [`close`](Self::close) starts a
    /// fresh connection with the registry intact.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut st = self.inner.lock_state();
            if st.reconnecting
                || matches!(st.phase, ConnectionState::Connecting | ConnectionState::Connected)
            {
                return Err(StreamError::InvalidArgument(format!(
                    "session is already {}",
                    if st.reconnecting { ConnectionState::Connecting } else { st.phase }
                )));
            }
            st.closed_by_caller = false;
            st.current_attempt = 0;
            st.phase = ConnectionState::Connecting;
            self.inner.shutdown.send_replace(false);
        }

        self.inner.establish().await
    }

    /// Subscribe `token_sets` under `mode`.
    ///
    /// The quota and DEPTH checks run before anything is sent. The tokens are
    /// recorded even if the send then fails, so a later
    /// [`resubscribe`](Self::resubscribe) or reconnect replays them.
    pub async fn subscribe(
        &self,
        correlation_id: impl Into<String>,
        mode: SubscriptionMode,
        token_sets: Vec<TokenSet>,
    ) -> Result<()> {
        let (request, payload) = {
            let mut st = self.inner.lock_state();
            if st.phase != ConnectionState::Connected {
                return Err(StreamError::NotConnected);
            }
            let request = st.registry.subscribe(correlation_id, mode, token_sets)?;
            match request.encode() {
                Ok(payload) => (request, payload),
                Err(e) => {
                    st.registry.revert(&request);
                    return Err(e);
                }
            }
        };

        tracing::debug!(
            correlation_id = %request.correlation_id,
            mode = %mode,
            tokens = request.token_count(),
            "Subscribing"
        );
        self.inner.send_text(payload).await
    }

    /// Unsubscribe every token held under `mode`.
    ///
    /// The registry entry for `mode` is cleared whatever `token_sets`
    /// contains; `token_sets` is only forwarded to the feed.
    pub async fn unsubscribe(
        &self,
        correlation_id: impl Into<String>,
        mode: SubscriptionMode,
        token_sets: Vec<TokenSet>,
    ) -> Result<()> {
        let (request, payload) = {
            let mut st = self.inner.lock_state();
            if st.phase != ConnectionState::Connected {
                return Err(StreamError::NotConnected);
            }
            let request = st.registry.unsubscribe(correlation_id, mode, token_sets);
            let payload = request.encode()?;
            (request, payload)
        };

        tracing::debug!(
            correlation_id = %request.correlation_id,
            mode = %mode,
            "Unsubscribing"
        );
        self.inner.send_text(payload).await
    }

    /// Send the registry's contents again, one subscribe frame per mode.
    /// Returns the number of frames sent.
    pub async fn resubscribe(&self) -> Result<usize> {
        if self.state() != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }
        self.inner.replay_subscriptions().await
    }

    /// Close the session for good and stop all background work.
    ///
    /// Waits up to the configured shutdown timeout for the read loop and
    /// heartbeat to finish, then aborts them. Fires on-close once; further
    /// calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let tasks = {
            let mut st = self.inner.lock_state();
            if st.closed_by_caller {
                return Ok(());
            }
            st.closed_by_caller = true;
            st.phase = ConnectionState::Disconnected;
            std::mem::take(&mut st.tasks)
        };
        self.inner.shutdown.send_replace(true);

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.close_writer()).await.is_err() {
            tracing::warn!("Timed out sending close frame");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!(
            client_code = %self.inner.credentials.client_code(),
            "Feed session closed"
        );
        self.inner.dispatcher.emit(SessionEvent::Close);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// When the last heartbeat probe was sent.
    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_state().liveness.last_ping()
    }

    /// When the peer was last heard on the liveness channel (`"pong"` text,
    /// or a ping/pong control frame).
    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_state().liveness.last_pong()
    }

    /// Reconnect attempts made since the last healthy connection.
    pub fn retry_attempt(&self) -> u32 {
        self.inner.lock_state().current_attempt
    }

    /// Snapshot of the subscription registry.
    pub fn subscriptions(&self) -> SubscriptionRegistry {
        self.inner.lock_state().registry.clone()
    }
}

// ---------------------------------------------------------------------------
// Connection management
// ---------------------------------------------------------------------------

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a socket, install it and spawn the per-connection tasks.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        {
            let mut st = self.lock_state();
            if st.closed_by_caller {
                return Err(StreamError::NotConnected);
            }
            st.phase = ConnectionState::Connecting;
        }

        let ws = match self.open_socket().await {
            Ok(ws) => ws,
            Err(e) => {
                {
                    let mut st = self.lock_state();
                    if st.phase == ConnectionState::Connecting {
                        st.phase = ConnectionState::Disconnected;
                    }
                }
                tracing::error!(endpoint = %self.config.endpoint, error = %e, "Feed connection failed");
                self.dispatcher.emit(SessionEvent::Error(duplicate_connect_error(&e)));
                return Err(e);
            }
        };

        let (write, read) = ws.split();
        let generation = {
            let mut writer = self.writer.lock().await;
            let mut st = self.lock_state();
            if st.closed_by_caller {
                st.phase = ConnectionState::Disconnected;
                return Err(StreamError::NotConnected);
            }
            *writer = Some(write);
            st.generation += 1;
            st.phase = ConnectionState::Connected;
            st.reconnecting = false;
            st.generation
        };

        let reader = tokio::spawn(read_loop(self.clone(), read, generation));
        let heartbeat = tokio::spawn(heartbeat::run(
            self.clone(),
            self.config.heartbeat_interval,
            generation,
        ));
        {
            let mut st = self.lock_state();
            st.tasks.retain(|task| !task.is_finished());
            st.tasks.push(reader);
            st.tasks.push(heartbeat);
        }

        tracing::info!(generation, endpoint = %self.config.endpoint, "Feed connection established");
        self.dispatcher.emit(SessionEvent::Connect);
        Ok(())
    }

    async fn open_socket(&self) -> Result<WsStream> {
        let mut request = self
            .config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::ConnectionFailure(e.to_string()))?;
        request.headers_mut().extend(self.credentials.auth_headers());

        let connector = if self.config.accept_invalid_certs {
            Some(tls::insecure_connector()?)
        } else {
            None
        };

        let handshake = connect_async_tls_with_config(request, None, false, connector);
        match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(StreamError::ConnectionFailure(e.to_string())),
            Err(_) => Err(StreamError::ConnectTimeout(self.config.connect_timeout)),
        }
    }

    /// Write one text frame, bounded by the write timeout.
    async fn send_text(&self, payload: String) -> Result<()> {
        let write = async {
            let mut guard = self.writer.lock().await;
            let sink = guard.as_mut().ok_or(StreamError::NotConnected)?;
            sink.send(Message::text(payload)).await?;
            Ok(())
        };
        match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::SendTimeout(self.config.write_timeout)),
        }
    }

    /// Drop the current sink after a best-effort close frame.
    async fn close_writer(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing WebSocket sink");
            }
        }
    }

    async fn replay_subscriptions(&self) -> Result<usize> {
        let requests = self
            .lock_state()
            .registry
            .replay_requests(RESUBSCRIBE_CORRELATION_ID);

        for request in &requests {
            tracing::debug!(
                mode = %request.params.mode,
                tokens = request.token_count(),
                "Replaying subscription"
            );
            self.send_text(request.encode()?).await?;
        }
        Ok(requests.len())
    }

    // -- read path ---------------------------------------------------------

    fn handle_binary(&self, data: Bytes) {
        if self.config.deliver_raw_frames {
            self.dispatcher
                .emit(SessionEvent::Message(FeedMessage::Raw(data.clone())));
        }

        match parse_packet(&data) {
            Ok(tick) => self.dispatcher.emit(SessionEvent::Message(FeedMessage::Tick(tick))),
            Err(e) => {
                tracing::warn!(len = data.len(), error = %e, "Failed to parse packet");
                self.dispatcher.emit(SessionEvent::Error(e));
            }
        }
    }

    fn record_pong(&self) {
        self.lock_state().liveness.record_pong(Utc::now());
    }

    /// The first frame on a connection proves it healthy.
    fn reset_attempts(&self, generation: u64) {
        let mut st = self.lock_state();
        if st.generation == generation && st.current_attempt != 0 {
            tracing::debug!(generation, attempts = st.current_attempt, "Retry counter reset");
            st.current_attempt = 0;
        }
    }

    async fn handle_read_failure(self: Arc<Self>, generation: u64, err: StreamError) {
        {
            let mut st = self.lock_state();
            if st.generation != generation || st.closed_by_caller {
                return;
            }
            st.phase = ConnectionState::Disconnected;
            st.reconnecting = true;
        }

        tracing::error!(generation, error = %err, "Feed connection lost");
        self.dispatcher.emit(SessionEvent::Error(err));
        self.close_writer().await;

        self.reconnect().await;
    }

    /// Run the retry policy until a connect succeeds, the caller closes the
    /// session, or attempts run out.
    async fn reconnect(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let max_attempts = self.config.retry.max_attempts;

        loop {
            let attempt = {
                let mut st = self.lock_state();
                if st.closed_by_caller {
                    st.reconnecting = false;
                    return;
                }
                if st.current_attempt >= max_attempts {
                    st.reconnecting = false;
                    st.phase = ConnectionState::Disconnected;
                    None
                } else {
                    st.current_attempt += 1;
                    Some(st.current_attempt)
                }
            };

            let Some(attempt) = attempt else {
                tracing::error!(max_attempts, "Reconnect attempts exhausted, giving up");
                self.dispatcher.emit(SessionEvent::NoReconnect);
                return;
            };

            let delay = self.config.retry.delay_for(attempt);
            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempting reconnect..."
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|closed| *closed) => {}
            }

            {
                let mut st = self.lock_state();
                if st.closed_by_caller {
                    st.reconnecting = false;
                    return;
                }
            }

            match self.establish().await {
                Ok(()) => {
                    tracing::info!(attempt, "Reconnected successfully");
                    self.dispatcher.emit(SessionEvent::Reconnect(attempt));
                    if self.config.resubscribe_on_reconnect {
                        if let Err(e) = self.replay_subscriptions().await {
                            tracing::error!(error = %e, "Failed to resubscribe after reconnect");
                            self.dispatcher.emit(SessionEvent::Error(e));
                        }
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnection failed");
                }
            }
        }
    }
}

impl HeartbeatTarget for Shared {
    fn is_live(&self, generation: u64) -> bool {
        let st = self.lock_state();
        st.generation == generation
            && st.phase == ConnectionState::Connected
            && !st.closed_by_caller
    }

    async fn send_probe(&self) -> Result<()> {
        self.send_text(HEARTBEAT_MESSAGE.to_owned()).await?;
        self.lock_state().liveness.record_ping(Utc::now());
        Ok(())
    }

    async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }
}

/// Read frames until the connection fails, then hand over to the reconnect
/// policy. Boxed because the reconnect path spawns a new read loop.
fn read_loop(shared: Arc<Shared>, mut read: ReaderHalf, generation: u64) -> BoxFuture<'static, ()> {
    async move {
        let mut first_frame = true;
        let mut shutdown = shared.shutdown.subscribe();

        let failure = loop {
            let next = tokio::select! {
                next = read.next() => next,
                _ = shutdown.wait_for(|closed| *closed) => {
                    tracing::debug!(generation, "Read loop stopped by close");
                    return;
                }
            };
            if !shared.is_live(generation) {
                tracing::debug!(generation, "Read loop stopped");
                return;
            }

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => break StreamError::ReadFailure(e.to_string()),
                None => break StreamError::ReadFailure("stream ended".into()),
            };

            if first_frame {
                first_frame = false;
                shared.reset_attempts(generation);
            }

            match msg {
                Message::Binary(data) => shared.handle_binary(data),
                Message::Text(text) => {
                    if text.as_str() == HEARTBEAT_REPLY {
                        shared.record_pong();
                    } else {
                        tracing::debug!(generation, text = %text.as_str(), "Received text frame");
                        shared
                            .dispatcher
                            .emit(SessionEvent::Message(FeedMessage::Text(text.to_string())));
                    }
                }
                Message::Ping(_) | Message::Pong(_) => shared.record_pong(),
                Message::Close(frame) => {
                    tracing::info!(generation, ?frame, "WebSocket closed by server");
                    break StreamError::ReadFailure("connection closed by server".into());
                }
                Message::Frame(_) => {}
            }
        };

        shared.handle_read_failure(generation, failure).await;
    }
    .boxed()
}

/// Connect errors go both to on-error and to the caller.
fn duplicate_connect_error(err: &StreamError) -> StreamError {
    match err {
        StreamError::ConnectionFailure(msg) => StreamError::ConnectionFailure(msg.clone()),
        StreamError::ConnectTimeout(d) => StreamError::ConnectTimeout(*d),
        other => StreamError::ConnectionFailure(other.to_string()),
    }
}
