use std::sync::{Arc, Weak};

use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use url::Url;

use super::config::MultiplexerConfig;
use super::connector::{Connector, Publication, Publisher};
use super::subscription::SubscriptionBook;
use super::types::{ChannelOp, ConnectionEvent, Subscription, SymbolsDelta};
use crate::Result;
use crate::error::{Error, Kind};
use crate::ws::{
    ConnectionHandler, ConnectionManager, Transport, TungsteniteTransport, WsError, WsStatus,
};

/// Many logical channels over one auto-healing WebSocket.
///
/// Keeps track of which subscriptions are wanted and which were sent on the current
/// socket, replays them after every reconnect, and fans parsed messages out to
/// per-channel subjects. Exchange specifics come from the [`Connector`].
///
/// Cheap to clone; clones share the same connection and state. Background work stops
/// once the last clone is dropped or [`shutdown`](Self::shutdown) is called.
///
/// # Example
///
/// ```ignore
/// let client = Multiplexer::new(Spot, MultiplexerConfig::default());
///
/// let trades = client.subject("trade");
/// client.add_ws_subscription(Subscription::with_symbol("trade", "BTC/USDT"));
///
/// futures::pin_mut!(trades);
/// while let Some(trade) = trades.next().await {
///     println!("{:?}", trade?);
/// }
/// ```
pub struct Multiplexer<C: Connector> {
    inner: Arc<MuxInner<C>>,
}

impl<C: Connector> Clone for Multiplexer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MuxInner<C: Connector> {
    connector: C,
    config: MultiplexerConfig,
    connection: ConnectionManager,
    book: SubscriptionBook,
    publication: Publication<C::Message>,
}

impl<C: Connector> Multiplexer<C> {
    /// Create a multiplexer backed by `tokio-tungstenite`. Nothing connects until a
    /// subscription is added or [`start`](Self::start) is called.
    #[must_use]
    pub fn new(connector: C, config: MultiplexerConfig) -> Self {
        Self::with_transport(connector, config, Arc::new(TungsteniteTransport))
    }

    /// Create a multiplexer that opens sockets through `transport`.
    #[must_use]
    pub fn with_transport(
        connector: C,
        config: MultiplexerConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<MuxInner<C>>| {
            let handler = Weak::<MuxInner<C>>::clone(weak) as Weak<dyn ConnectionHandler>;
            let liveness_channel = config.liveness.as_ref().map(|l| l.channel.clone());

            MuxInner {
                connector,
                connection: ConnectionManager::with_transport(
                    config.connection.clone(),
                    handler,
                    transport,
                ),
                config,
                book: SubscriptionBook::default(),
                publication: Publication::new(liveness_channel),
            }
        });

        Self { inner }
    }

    /// The exchange connector this multiplexer was built with.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// The underlying connection, for state and status inspection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Connect and keep the connection alive. See [`ConnectionManager::start`].
    pub async fn start(&self) {
        self.inner.connection.start().await;
    }

    /// Close the connection and stop background work. See [`ConnectionManager::shutdown`].
    ///
    /// Subjects and subscriptions are kept unless the config says otherwise.
    pub fn shutdown(&self) {
        self.inner.connection.shutdown();
    }

    /// Messages published on `channel`. Creates the subject if it doesn't exist yet.
    ///
    /// Multiple consumers may attach to the same channel. A consumer that falls behind
    /// receives one [`WsError::Lagged`] item and then continues with newer messages.
    pub fn subject(&self, channel: &str) -> impl Stream<Item = Result<C::Message>> + use<C> {
        self.inner.publication.subjects.subject(channel)
    }

    /// Like [`subject`](Self::subject), but only if something already created the channel.
    pub fn observable(
        &self,
        channel: &str,
    ) -> Option<impl Stream<Item = Result<C::Message>> + use<C>> {
        self.inner.publication.subjects.observable(channel)
    }

    /// Publish a message to `channel` from outside the connector callback.
    pub fn publish_message(&self, channel: &str, message: C::Message) -> usize {
        self.inner.publication.publish(channel, message)
    }

    /// Terminate `channel`'s subject; its consumers see the end of their streams.
    pub fn close_subject(&self, channel: &str) -> bool {
        self.inner.publication.subjects.close(channel, None)
    }

    /// Want `subscriptions`. Sent right away when the connection is open, otherwise
    /// replayed once it opens.
    ///
    /// Auto-start needs a Tokio runtime. Outside of one the subscriptions stay pending
    /// until [`start`](Self::start) is called.
    pub fn add_ws_subscriptions<I>(&self, subscriptions: I)
    where
        I: IntoIterator<Item = Subscription>,
    {
        let added = self.inner.book.add_pending(subscriptions);

        #[cfg(feature = "tracing")]
        tracing::debug!(count = added, "Subscriptions queued");
        #[cfg(not(feature = "tracing"))]
        let _ = added;

        if self.inner.connection.state().is_open() {
            self.inner.flush_pending();
        } else if self.inner.config.auto_start_on_subscription {
            match Handle::try_current() {
                Ok(runtime) => {
                    let connection = self.inner.connection.clone();
                    runtime.spawn(async move { connection.start().await });
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "No Tokio runtime, subscriptions wait for start()");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }
    }

    /// Want a single subscription. See [`add_ws_subscriptions`](Self::add_ws_subscriptions).
    pub fn add_ws_subscription(&self, subscription: Subscription) {
        self.add_ws_subscriptions([subscription]);
    }

    /// Stop wanting `subscriptions`.
    ///
    /// Those already sent on an open connection are unsubscribed on the wire. Local
    /// bookkeeping is updated in every connection state.
    pub fn remove_ws_subscriptions(&self, subscriptions: &[Subscription]) {
        let inner = &self.inner;
        let result = inner.book.remove(subscriptions, |live| {
            if inner.connection.state().is_open() {
                inner
                    .connector
                    .operate_ws_channel(ChannelOp::Unsubscribe, live, &inner.connection)
            } else {
                Ok(())
            }
        });

        match result {
            Ok(count) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(count, "Subscriptions removed");
                #[cfg(not(feature = "tracing"))]
                let _ = count;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to unsubscribe");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Stop wanting a single subscription. See
    /// [`remove_ws_subscriptions`](Self::remove_ws_subscriptions).
    pub fn remove_ws_subscription(&self, subscription: &Subscription) {
        self.remove_ws_subscriptions(std::slice::from_ref(subscription));
    }

    /// Subscribe `channel` for each of `symbols`.
    pub fn add_symbols<I, S>(&self, channel: &str, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_ws_subscriptions(
            symbols
                .into_iter()
                .map(|symbol| Subscription::with_symbol(channel, symbol)),
        );
    }

    /// Unsubscribe `channel` for each of `symbols`.
    pub fn remove_symbols<I, S>(&self, channel: &str, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscriptions: Vec<Subscription> = symbols
            .into_iter()
            .map(|symbol| Subscription::with_symbol(channel, symbol))
            .collect();
        self.remove_ws_subscriptions(&subscriptions);
    }

    /// Apply a change in tradable symbols to every active symbol-aware channel.
    pub fn notify_symbols_changed(&self, delta: &SymbolsDelta) {
        let channels: Vec<String> = self
            .inner
            .book
            .active_channels()
            .into_iter()
            .filter(|channel| self.inner.config.symbol_aware_channels.contains(channel))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::info!(
            ?channels,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "Applying symbol changes"
        );

        for channel in &channels {
            self.remove_symbols(channel, delta.removed.iter().cloned());
            self.add_symbols(channel, delta.added.iter().cloned());
        }
    }

    /// Channels with at least one pending or completed subscription, sorted.
    #[must_use]
    pub fn active_channels(&self) -> Vec<String> {
        self.inner.book.active_channels().into_iter().collect()
    }

    /// Whether `symbol` is wanted on `channel`, sent or not.
    #[must_use]
    pub fn has_running_symbol(&self, channel: &str, symbol: &str) -> bool {
        self.inner.book.has_running_symbol(channel, symbol)
    }

    /// Symbols wanted on `channel`, whether already sent or not, sorted.
    #[must_use]
    pub fn running_symbols(&self, channel: &str) -> Vec<String> {
        self.inner.book.running_symbols(channel)
    }

    /// Connection open and disconnect events, correlated with liveness-channel traffic.
    pub fn ws_disconnect_subject(
        &self,
    ) -> impl Stream<Item = Result<ConnectionEvent<C::Message>>> + use<C> {
        let mut receiver = self.inner.publication.events();
        stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield Ok(event),
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(count)) => yield Err(WsError::Lagged { count }.into()),
                }
            }
        }
    }

    /// Connection counters, subscription stages and per-channel statistics.
    #[must_use]
    pub fn collect_ws_status(&self) -> WsStatus {
        WsStatus {
            connection: self.inner.connection.status(),
            subscriptions: self.inner.book.status(),
            channels: self.inner.publication.subjects.status(),
        }
    }

    /// One-line summary of [`collect_ws_status`](Self::collect_ws_status).
    #[must_use]
    pub fn ws_status_snapshot(&self) -> String {
        self.collect_ws_status().to_string()
    }
}

impl<C: Connector> MuxInner<C> {
    fn flush_pending(&self) {
        let result = self.book.flush(|batch| self.subscribe(batch));

        match result {
            Ok(0) => {}
            Ok(count) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(count, "Subscriptions sent");
                #[cfg(not(feature = "tracing"))]
                let _ = count;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to subscribe, will retry on next flush");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Send one subscribe batch. On error the batch stays pending.
    fn subscribe(&self, batch: &[Subscription]) -> Result<()> {
        if !self.connection.state().is_open() {
            return Err(WsError::NotConnected.into());
        }

        self.connector
            .operate_ws_channel(ChannelOp::Subscribe, batch, &self.connection)
            .map_err(|e| {
                let keys: Vec<String> = batch.iter().map(Subscription::key).collect();
                Error::with_source(
                    Kind::WebSocket,
                    WsError::SubscriptionFailed(format!("{}: {e}", keys.join(","))),
                )
            })
    }
}

#[async_trait]
impl<C: Connector> ConnectionHandler for MuxInner<C> {
    async fn address(&self) -> Result<Url> {
        self.connector.address().await
    }

    fn on_message(&self, message: Value) -> Result<()> {
        self.connector
            .on_message_obj(message, &Publisher::new(&self.publication))
    }

    fn on_open(&self) {
        self.publication.on_open();

        let replayed = self.book.reset_completed_to_pending();
        #[cfg(feature = "tracing")]
        tracing::info!(count = replayed, "Connection open, replaying subscriptions");
        #[cfg(not(feature = "tracing"))]
        let _ = replayed;

        self.flush_pending();
    }

    fn on_close(&self) {
        self.publication.on_close();
    }

    fn check_need_reconnect(&self) -> bool {
        let Some(liveness) = &self.config.liveness else {
            return false;
        };
        let Some(stale_timeout) = liveness.stale_timeout else {
            return false;
        };
        if !self.book.has_completed_channel(&liveness.channel) {
            return false;
        }

        let silence = self.publication.liveness_silence();
        if silence <= stale_timeout {
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            channel = %liveness.channel,
            silent_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
            "Liveness channel went silent, requesting reconnect"
        );
        true
    }

    fn on_shutdown(&self) {
        if self.config.close_subjects_on_shutdown {
            self.publication.subjects.close_all(None);
        }
        if self.config.clear_subscriptions_on_shutdown {
            self.book.clear();
        }
    }
}
