//! The capability interface exchange connectors implement, and the publishing side of
//! the multiplexer they feed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use url::Url;

use super::subject::{ChannelRegistry, SUBJECT_CAPACITY};
use super::types::{ChannelOp, ConnectionEvent, Subscription};
use crate::Result;
use crate::ws::ConnectionManager;

/// Exchange-specific behaviour plugged into a [`Multiplexer`](super::Multiplexer).
///
/// # Example
///
/// ```ignore
/// struct Spot;
///
/// #[async_trait]
/// impl Connector for Spot {
///     type Message = Trade;
///
///     async fn address(&self) -> Result<Url> {
///         Ok(Url::parse("wss://stream.example.com/ws")?)
///     }
///
///     fn operate_ws_channel(
///         &self,
///         op: ChannelOp,
///         subscriptions: &[Subscription],
///         connection: &ConnectionManager,
///     ) -> Result<()> {
///         let args: Vec<String> = subscriptions.iter().map(Subscription::key).collect();
///         connection.send_json(&json!({ "op": op, "args": args }))?;
///         Ok(())
///     }
///
///     fn on_message_obj(&self, message: Value, publisher: &Publisher<'_, Trade>) -> Result<()> {
///         let trade: Trade = serde_json::from_value(message)?;
///         publisher.publish("trade", trade);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Parsed message type published to channel subjects.
    type Message: Clone + Send + 'static;

    /// Resolve the endpoint for the next connection attempt.
    async fn address(&self) -> Result<Url>;

    /// Encode and send the wire message(s) for `subscriptions`.
    ///
    /// Called while the multiplexer's subscription book is locked. Implementations must
    /// not call back into the multiplexer.
    fn operate_ws_channel(
        &self,
        op: ChannelOp,
        subscriptions: &[Subscription],
        connection: &ConnectionManager,
    ) -> Result<()>;

    /// Parse one decoded inbound message and publish it to the right channel(s).
    fn on_message_obj(&self, message: Value, publisher: &Publisher<'_, Self::Message>)
    -> Result<()>;
}

/// Traffic seen on the liveness channel.
struct Liveness<M> {
    /// Last liveness message ever seen
    last_message: Option<M>,
    last_message_at: Option<Instant>,
    /// Last liveness message before the most recent disconnect
    before_disconnect: Option<M>,
    /// The next liveness message completes an `Open` event
    awaiting_resume: bool,
    /// When the current socket opened
    opened_at: Instant,
}

/// Publishing state shared by the multiplexer and the connector callbacks.
pub(crate) struct Publication<M> {
    pub(crate) subjects: ChannelRegistry<M>,
    liveness_channel: Option<String>,
    liveness: Mutex<Liveness<M>>,
    events: broadcast::Sender<ConnectionEvent<M>>,
}

impl<M: Clone + Send + 'static> Publication<M> {
    pub(crate) fn new(liveness_channel: Option<String>) -> Self {
        let (events, _) = broadcast::channel(SUBJECT_CAPACITY);
        Self {
            subjects: ChannelRegistry::default(),
            liveness_channel,
            liveness: Mutex::new(Liveness {
                last_message: None,
                last_message_at: None,
                before_disconnect: None,
                awaiting_resume: true,
                opened_at: Instant::now(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Liveness<M>> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<ConnectionEvent<M>> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, channel: &str, message: M) -> usize {
        if self.liveness_channel.as_deref() == Some(channel) {
            let resumed = {
                let mut liveness = self.lock();
                liveness.last_message = Some(message.clone());
                liveness.last_message_at = Some(Instant::now());
                liveness.awaiting_resume.then(|| {
                    liveness.awaiting_resume = false;
                    ConnectionEvent::open(liveness.before_disconnect.take(), Some(message.clone()))
                })
            };
            if let Some(event) = resumed {
                self.emit(event);
            }
        }

        self.subjects.publish(channel, message)
    }

    /// A socket opened. Without a liveness channel the `Open` event goes out right away;
    /// otherwise it waits for the first liveness message.
    pub(crate) fn on_open(&self) {
        let immediate = {
            let mut liveness = self.lock();
            liveness.opened_at = Instant::now();
            liveness.awaiting_resume = true;
            self.liveness_channel.is_none()
        };
        if immediate {
            self.emit(ConnectionEvent::open(None, None));
        }
    }

    pub(crate) fn on_close(&self) {
        let last_message = {
            let mut guard = self.lock();
            let liveness = &mut *guard;
            liveness.before_disconnect.clone_from(&liveness.last_message);
            liveness.last_message.clone()
        };
        self.emit(ConnectionEvent::disconnect(last_message));
    }

    /// How long the liveness channel has been silent on the current socket.
    pub(crate) fn liveness_silence(&self) -> Duration {
        let liveness = self.lock();
        let since = liveness
            .last_message_at
            .map_or(liveness.opened_at, |at| at.max(liveness.opened_at));
        since.elapsed()
    }

    fn emit(&self, event: ConnectionEvent<M>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = %event.kind, "Connection event");
        // Nobody listening is fine.
        drop(self.events.send(event));
    }
}

/// Handle connectors use to publish parsed messages.
pub struct Publisher<'mux, M> {
    publication: &'mux Publication<M>,
}

impl<'mux, M: Clone + Send + 'static> Publisher<'mux, M> {
    pub(crate) fn new(publication: &'mux Publication<M>) -> Self {
        Self { publication }
    }

    /// Deliver `message` to every consumer of `channel`. Returns how many consumers got it.
    pub fn publish(&self, channel: &str, message: M) -> usize {
        self.publication.publish(channel, message)
    }
}
