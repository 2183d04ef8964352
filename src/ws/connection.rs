#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::config::{Config, ReconnectBackoff};
use super::error::WsError;
use super::status::{ConnectionCounters, ConnectionStatus};
use super::traits::ConnectionHandler;
use super::transport::{Socket, Transport, TungsteniteTransport};
use crate::Result;

/// Heartbeat frames understood by every exchange this layer talks to.
const PING_FRAME: &str = "ping";
const PONG_FRAME: &str = "pong";

/// Connection state tracking.
///
/// ```text
/// NotConnected ──start──▶ Connecting ──open──▶ Open ──close──▶ UnexpectedlyClosed
///      ▲                      │                                      │
///      └──────connect error───┘◀──────────health check reconnect─────┘
///
/// any non-terminal state ──shutdown──▶ ShuttingDown ──close ack / watchdog──▶ Shutdown
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No socket and no attempt in flight
    NotConnected,
    /// A connect attempt is in flight; doubles as the reconnect lock
    Connecting,
    /// Socket is established
    Open,
    /// Socket went away without being asked to
    UnexpectedlyClosed,
    /// Shutdown requested, waiting for the socket to acknowledge the close
    ShuttingDown,
    /// Fully stopped
    Shutdown,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if shutdown has been requested or completed.
    #[must_use]
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Shutdown)
    }
}

/// What the I/O task should do after a frame was handled.
enum FrameAction {
    Continue,
    Reply(Message),
    Close,
}

struct ActiveSocket {
    id: u64,
    writer: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    opened_at: Instant,
}

struct Core {
    state: ConnectionState,
    /// Bumped whenever in-flight connect attempts must be discarded.
    epoch: u64,
    /// Set by `start()`, cleared by `shutdown()`. While set the health check owns retries.
    started: bool,
    socket: Option<ActiveSocket>,
    /// Socket whose close acknowledgment completes a pending shutdown.
    closing_socket: Option<u64>,
    next_socket_id: u64,
    last_connect_attempt: Option<Instant>,
    last_ping: Instant,
    last_touch: Option<Instant>,
    backoff: ReconnectBackoff,
    counters: ConnectionCounters,
    watchdog: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

struct Inner {
    config: Config,
    transport: Arc<dyn Transport>,
    handler: Weak<dyn ConnectionHandler>,
    state_tx: watch::Sender<ConnectionState>,
    core: Mutex<Core>,
    health_running: AtomicBool,
}

/// Manages one physical WebSocket: lifecycle, heartbeat, staleness detection, and
/// reconnection with bounded backoff.
///
/// The manager knows nothing about message content or subscriptions. Decoded JSON
/// messages and lifecycle events go to a [`ConnectionHandler`], which is held weakly:
/// once the handler is dropped, background tasks wind down on their own.
///
/// Sends are fire-and-drop. Anything sent while the socket is not open is logged and
/// discarded, never queued.
///
/// # Example
///
/// ```ignore
/// let handler: Arc<dyn ConnectionHandler> = Arc::new(MyHandler);
/// let connection = ConnectionManager::new(Config::default(), Arc::downgrade(&handler));
///
/// connection.start().await;
/// connection.send(r#"{"op":"subscribe","args":["trade.BTCUSDT"]}"#);
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a connection manager backed by `tokio-tungstenite`.
    ///
    /// Nothing happens on the network until [`start`](Self::start) is called.
    #[must_use]
    pub fn new(config: Config, handler: Weak<dyn ConnectionHandler>) -> Self {
        Self::with_transport(config, handler, Arc::new(TungsteniteTransport))
    }

    /// Create a connection manager that opens sockets through `transport`.
    #[must_use]
    pub fn with_transport(
        config: Config,
        handler: Weak<dyn ConnectionHandler>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::NotConnected);
        let backoff = ReconnectBackoff::new(&config.reconnect);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                handler,
                state_tx,
                core: Mutex::new(Core {
                    state: ConnectionState::NotConnected,
                    epoch: 0,
                    started: false,
                    socket: None,
                    closing_socket: None,
                    next_socket_id: 0,
                    last_connect_attempt: None,
                    last_ping: Instant::now(),
                    last_touch: None,
                    backoff,
                    counters: ConnectionCounters::default(),
                    watchdog: None,
                    health: None,
                }),
                health_running: AtomicBool::new(false),
            }),
        }
    }

    /// Start connecting and keep the connection alive until [`shutdown`](Self::shutdown).
    ///
    /// Resolves once the first attempt has either opened the socket or failed. A failed
    /// attempt is not an error: the health-check loop keeps retrying with backoff.
    ///
    /// Idempotent. Does nothing while an attempt is in flight or the connection is
    /// already being kept alive. After a shutdown, starts over from `NotConnected`.
    pub async fn start(&self) {
        let epoch = {
            let mut guard = self.inner.lock();
            let core = &mut *guard;
            match core.state {
                ConnectionState::Connecting
                | ConnectionState::Open
                | ConnectionState::UnexpectedlyClosed => return,
                ConnectionState::NotConnected if core.started => return,
                ConnectionState::ShuttingDown | ConnectionState::Shutdown => {
                    if let Some(watchdog) = core.watchdog.take() {
                        watchdog.abort();
                    }
                    core.closing_socket = None;
                    self.inner.transition(core, ConnectionState::NotConnected);
                }
                ConnectionState::NotConnected => {}
            }

            core.started = true;
            if core.health.is_none() {
                core.health = Some(self.inner.spawn_health_loop());
            }
            self.inner.begin_attempt(core)
        };

        let attempt = Attempt {
            inner: &self.inner,
            epoch,
        };
        self.inner.connect(attempt).await;
    }

    /// Close the socket and stop all background work.
    ///
    /// Moves to `ShuttingDown` and completes to `Shutdown` once the socket acknowledges
    /// the close, or after `shutdown_timeout` regardless. Any connect attempt still in
    /// flight is discarded when it completes. Safe to call from any state, any number
    /// of times; only the first call has an effect.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let (was_open, health) = {
            let mut guard = inner.lock();
            let core = &mut *guard;
            if core.state.is_terminating() {
                return;
            }

            let was_open = core.state.is_open();
            core.epoch += 1;
            core.started = false;
            inner.transition(core, ConnectionState::ShuttingDown);

            if let Some(socket) = core.socket.take() {
                core.counters.record_close();
                core.closing_socket = Some(socket.id);
                socket.cancel.cancel();
                core.watchdog = Some(inner.spawn_shutdown_watchdog());
            } else {
                inner.transition(core, ConnectionState::Shutdown);
            }

            (was_open, core.health.take())
        };

        if let Some(health) = health {
            health.abort();
        }

        if let Some(handler) = inner.handler.upgrade() {
            if was_open {
                handler.on_close();
            }
            handler.on_shutdown();
        }
    }

    /// Replace the current socket with a fresh one.
    ///
    /// An open socket is closed first, followed by a `reconnect_settle` pause so its
    /// close handling finishes before the new socket opens. No-op while connecting or
    /// shutting down.
    pub async fn reconnect(&self) {
        self.inner.reconnect(false).await;
    }

    /// Run one health check now.
    ///
    /// The periodic loop calls this on every tick. A check that is already running makes
    /// this call return immediately, so reconnects are never triggered twice.
    pub async fn check_health(&self) {
        self.inner.health_check().await;
    }

    /// Write a text frame if the connection is open.
    ///
    /// Returns whether the frame was handed to the socket. Frames sent while the
    /// connection is not open are dropped.
    pub fn send<T: Into<String>>(&self, text: T) -> bool {
        let mut guard = self.inner.lock();
        let core = &mut *guard;

        if core.state.is_open()
            && let Some(socket) = &core.socket
            && socket.writer.send(Message::Text(text.into().into())).is_ok()
        {
            core.counters.messages_sent += 1;
            return true;
        }

        core.counters.messages_dropped += 1;
        #[cfg(feature = "tracing")]
        tracing::warn!(state = %core.state, "Dropping outbound message: connection is not open");
        false
    }

    /// Serialize `request` as JSON and [`send`](Self::send) it.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<bool> {
        let json = serde_json::to_string(request)?;
        Ok(self.send(json))
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The extra delay the next reconnect waits on top of the minimum interval.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.inner.lock().backoff.current()
    }

    /// Collect counters and recent connection spans.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let core = self.inner.lock();
        ConnectionStatus {
            state: core.state,
            first_attempt_at: core.counters.first_attempt_at,
            attempts: core.counters.attempts,
            opens: core.counters.opens,
            closes: core.counters.closes,
            current_delay_ms: millis(core.backoff.current()),
            last_touch_ago_ms: core.last_touch.map(|touch| millis(touch.elapsed())),
            messages_sent: core.counters.messages_sent,
            messages_dropped: core.counters.messages_dropped,
            messages_received: core.counters.messages_received,
            pings_sent: core.counters.pings_sent,
            pongs_received: core.counters.pongs_received,
            spans: core.counters.spans.iter().cloned().collect(),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        // Every critical section leaves `Core` consistent, so a poisoned lock is still usable.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, core: &mut Core, to: ConnectionState) {
        let from = core.state;
        if from == to {
            return;
        }
        core.state = to;

        #[cfg(feature = "tracing")]
        tracing::info!(
            %from,
            %to,
            at = %chrono::Utc::now().to_rfc3339(),
            "WebSocket state transition"
        );
        self.state_tx.send_replace(to);
    }

    /// Enter `Connecting` for a new attempt and return the attempt's epoch.
    fn begin_attempt(&self, core: &mut Core) -> u64 {
        core.epoch += 1;
        core.last_connect_attempt = Some(Instant::now());
        core.counters.record_attempt();
        self.transition(core, ConnectionState::Connecting);
        core.epoch
    }

    /// Run `attempt` to completion. Unless the socket gets installed, dropping the
    /// attempt (on failure or when the caller stops polling) leaves `Connecting`.
    async fn connect(self: &Arc<Self>, attempt: Attempt<'_>) {
        let Some(handler) = self.handler.upgrade() else {
            return;
        };

        let establish = async {
            let url = handler.address().await?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(WsError::InvalidAddress(url.to_string()).into());
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(%url, "Connecting WebSocket");
            self.transport.connect(&url).await
        };

        let result = match timeout(self.config.connect_timeout, establish).await {
            Ok(result) => result,
            Err(_elapsed) => Err(WsError::Timeout.into()),
        };

        match result {
            Ok(socket) => {
                if self.install(attempt.epoch, socket) {
                    drop(attempt);
                    guarded("on_open", || handler.on_open());
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn fail_attempt(&self, epoch: u64) {
        let mut guard = self.lock();
        let core = &mut *guard;
        if core.epoch == epoch && core.state == ConnectionState::Connecting {
            self.transition(core, ConnectionState::NotConnected);
        }
    }

    /// Adopt a freshly connected socket unless the attempt was superseded meanwhile.
    fn install(self: &Arc<Self>, epoch: u64, socket: Socket) -> bool {
        let mut guard = self.lock();
        let core = &mut *guard;
        if core.epoch != epoch || core.state != ConnectionState::Connecting {
            #[cfg(feature = "tracing")]
            tracing::debug!(state = %core.state, "Discarding socket from a superseded connect attempt");
            return false;
        }

        let (writer, outbound) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = core.next_socket_id;
        core.next_socket_id += 1;

        let now = Instant::now();
        core.socket = Some(ActiveSocket {
            id,
            writer,
            cancel: cancel.clone(),
            opened_at: now,
        });
        core.last_touch = Some(now);
        core.last_ping = now;
        core.counters.record_open();
        self.transition(core, ConnectionState::Open);

        tokio::spawn(run_socket(
            Arc::downgrade(self),
            id,
            socket,
            outbound,
            cancel,
            self.config.shutdown_timeout,
        ));
        true
    }

    fn handle_frame(&self, message: Message) -> FrameAction {
        let now = Instant::now();
        match message {
            Message::Text(text) => {
                {
                    let mut core = self.lock();
                    core.last_touch = Some(now);
                    core.counters.messages_received += 1;
                    if text.as_str() == PONG_FRAME {
                        core.last_ping = now;
                        core.counters.pongs_received += 1;
                    }
                }

                match text.as_str() {
                    PING_FRAME => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Answering heartbeat ping");
                        return FrameAction::Reply(Message::Text(PONG_FRAME.into()));
                    }
                    PONG_FRAME => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Received heartbeat pong");
                    }
                    payload => self.dispatch(payload),
                }
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {
                self.lock().last_touch = Some(now);
            }
            Message::Close(frame) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?frame, "Server closed the WebSocket");
                #[cfg(not(feature = "tracing"))]
                let _ = &frame;
                return FrameAction::Close;
            }
            Message::Frame(_) => {}
        }
        FrameAction::Continue
    }

    fn dispatch(&self, payload: &str) {
        let message: Value = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                let error = WsError::MessageParse(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%payload, %error, "Dropping malformed WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                return;
            }
        };

        let Some(handler) = self.handler.upgrade() else {
            return;
        };

        if let Some(Err(e)) = guarded("on_message", || handler.on_message(message)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(%payload, error = %e, "Message handler failed");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    fn on_socket_closed(&self, id: u64) {
        let mut guard = self.lock();
        let core = &mut *guard;

        if core.closing_socket == Some(id) {
            core.closing_socket = None;
            if core.state == ConnectionState::ShuttingDown {
                if let Some(watchdog) = core.watchdog.take() {
                    watchdog.abort();
                }
                self.transition(core, ConnectionState::Shutdown);
            }
            return;
        }

        // A socket replaced by a reconnect was already accounted for.
        let Some(socket) = core.socket.take_if(|socket| socket.id == id) else {
            return;
        };

        if socket.opened_at.elapsed() >= self.config.reconnect.stable_grace {
            core.backoff.reset();
        }
        core.counters.record_close();
        self.transition(core, ConnectionState::UnexpectedlyClosed);
        drop(guard);

        if let Some(handler) = self.handler.upgrade() {
            handler.on_close();
        }
    }

    fn force_shutdown(&self) {
        let mut guard = self.lock();
        let core = &mut *guard;
        core.watchdog = None;
        if core.state == ConnectionState::ShuttingDown {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                timeout = ?self.config.shutdown_timeout,
                "Socket did not acknowledge close, forcing shutdown"
            );
            core.closing_socket = None;
            self.transition(core, ConnectionState::Shutdown);
        }
    }

    fn spawn_shutdown_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let shutdown_timeout = self.config.shutdown_timeout;
        tokio::spawn(async move {
            sleep(shutdown_timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.force_shutdown();
            }
        })
    }

    fn spawn_health_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            // Ticks that fire while a check is still waiting or reconnecting are dropped.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.health_check().await;
            }
        })
    }

    async fn health_check(self: &Arc<Self>) {
        if self.health_running.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Previous health check still running, skipping");
            return;
        }
        let _running = RunningGuard(&self.health_running);

        self.send_heartbeat_if_due();

        let Some(deadline) = self.reconnect_deadline() else {
            return;
        };
        sleep_until(deadline).await;

        let still_needed = {
            let core = self.lock();
            core.started
                && matches!(
                    core.state,
                    ConnectionState::Open
                        | ConnectionState::UnexpectedlyClosed
                        | ConnectionState::NotConnected
                )
        };
        if still_needed {
            self.reconnect(true).await;
        }
    }

    fn send_heartbeat_if_due(&self) {
        let mut guard = self.lock();
        let core = &mut *guard;
        let Some(socket) = &core.socket else {
            return;
        };

        let now = Instant::now();
        if now.duration_since(core.last_ping) <= self.config.ping_interval {
            return;
        }
        if socket.writer.send(Message::Text(PING_FRAME.into())).is_ok() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Sending heartbeat ping");
            core.last_ping = now;
            core.counters.pings_sent += 1;
        }
    }

    /// Decide whether a reconnect is due and when it may happen.
    fn reconnect_deadline(&self) -> Option<Instant> {
        let (state, started, stale) = {
            let mut guard = self.lock();
            let core = &mut *guard;
            let now = Instant::now();

            if let Some(socket) = &core.socket
                && now.duration_since(socket.opened_at) >= self.config.reconnect.stable_grace
            {
                core.backoff.reset();
            }

            let stale = core
                .last_touch
                .is_some_and(|touch| now.duration_since(touch) > self.config.last_touch_timeout);
            (core.state, core.started, stale)
        };

        // The handler is consulted outside the lock; it may read connection status.
        let reason = match state {
            ConnectionState::UnexpectedlyClosed => "unexpectedly closed",
            ConnectionState::NotConnected if started => "not connected",
            ConnectionState::Open if stale => "no inbound traffic",
            ConnectionState::Open
                if self.handler.upgrade().is_some_and(|handler| {
                    guarded("check_need_reconnect", || handler.check_need_reconnect())
                        .unwrap_or(false)
                }) =>
            {
                "requested by handler"
            }
            _ => return None,
        };

        let core = self.lock();
        let last_attempt = core.last_connect_attempt.unwrap_or_else(Instant::now);
        let delay = core.backoff.current();

        #[cfg(feature = "tracing")]
        tracing::info!(
            reason,
            delay_ms = millis(delay),
            "Reconnect scheduled"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = &reason;

        Some(last_attempt + self.config.reconnect.min_interval + delay)
    }

    async fn reconnect(self: &Arc<Self>, advance_backoff: bool) {
        let (epoch, previous, was_open) = {
            let mut guard = self.lock();
            let core = &mut *guard;
            if matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::ShuttingDown | ConnectionState::Shutdown
            ) {
                return;
            }

            let was_open = core.state.is_open();
            let previous = core.socket.take();
            if previous.is_some() {
                core.counters.record_close();
            }
            let epoch = self.begin_attempt(core);
            if advance_backoff {
                core.backoff.advance();
            }
            (epoch, previous, was_open)
        };
        let attempt = Attempt { inner: self, epoch };

        if was_open && let Some(handler) = self.handler.upgrade() {
            handler.on_close();
        }

        if let Some(socket) = previous {
            socket.cancel.cancel();
            sleep(self.config.reconnect_settle).await;
        }

        self.connect(attempt).await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = core.socket.take() {
            socket.cancel.cancel();
        }
        if let Some(health) = core.health.take() {
            health.abort();
        }
        if let Some(watchdog) = core.watchdog.take() {
            watchdog.abort();
        }
    }
}

/// A connect attempt in flight.
struct Attempt<'a> {
    inner: &'a Inner,
    epoch: u64,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        self.inner.fail_attempt(self.epoch);
    }
}

/// Call a handler hook, containing a panic to the hook itself.
fn guarded<F, R>(hook: &'static str, call: F) -> Option<R>
where
    F: FnOnce() -> R,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(_panic) => {
            #[cfg(feature = "tracing")]
            tracing::error!(hook, "Connection handler panicked");
            #[cfg(not(feature = "tracing"))]
            let _ = hook;
            None
        }
    }
}

/// Clears the health-check flag when a check finishes or is aborted.
struct RunningGuard<'flag>(&'flag AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Own one socket: write outbound frames, read and dispatch inbound frames in order.
async fn run_socket(
    inner: Weak<Inner>,
    id: u64,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    close_timeout: Duration,
) {
    let Socket {
        mut sink,
        mut stream,
    } = socket;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                let closed = timeout(close_timeout, sink.close()).await;
                #[cfg(feature = "tracing")]
                if !matches!(closed, Ok(Ok(()))) {
                    tracing::debug!(socket = id, "Socket close was not acknowledged cleanly");
                }
                #[cfg(not(feature = "tracing"))]
                let _ = &closed;
                break;
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(socket = id, error = %e, "Failed to write to WebSocket");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    break;
                }
            }

            frame = stream.next() => {
                let Some(this) = inner.upgrade() else {
                    break;
                };
                let action = match frame {
                    Some(Ok(message)) => this.handle_frame(message),
                    Some(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(socket = id, error = %e, "WebSocket read failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        FrameAction::Close
                    }
                    None => FrameAction::Close,
                };

                match action {
                    FrameAction::Continue => {}
                    FrameAction::Reply(reply) => {
                        if sink.send(reply).await.is_err() {
                            break;
                        }
                    }
                    FrameAction::Close => break,
                }
            }
        }
    }

    if let Some(this) = inner.upgrade() {
        this.on_socket_closed(id);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
