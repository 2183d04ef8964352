//! Types shared by the channel multiplexer and the connectors built on it.

use bon::Builder;
use serde::Serialize;
use serde_json::{Map, Value};

/// One logical subscription: a channel, optionally narrowed to a symbol.
///
/// Two subscriptions with the same [`key`](Self::key) are the same subscription, whatever
/// their options.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Builder)]
pub struct Subscription {
    /// Channel name (e.g., `trade`, `kline`)
    #[builder(into)]
    pub channel: String,
    /// Market symbol (e.g., `BTC/USDT`)
    #[builder(into)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Connector-specific parameters, such as a kline interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl Subscription {
    /// Subscription to a whole channel.
    #[must_use]
    pub fn new<S: Into<String>>(channel: S) -> Self {
        Self {
            channel: channel.into(),
            symbol: None,
            options: None,
        }
    }

    /// Subscription to one symbol on a channel.
    #[must_use]
    pub fn with_symbol<C: Into<String>, S: Into<String>>(channel: C, symbol: S) -> Self {
        Self {
            channel: channel.into(),
            symbol: Some(symbol.into()),
            options: None,
        }
    }

    /// Identity of this subscription: `channel`, or `channel:symbol`.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{}:{symbol}", self.channel),
            None => self.channel.clone(),
        }
    }
}

/// Direction of a wire-level channel operation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelOp {
    Subscribe,
    Unsubscribe,
}

/// Item carried by a channel subject.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent<M> {
    Data(M),
    /// The subject completed normally
    Closed,
    /// The subject was terminated with an error
    Errored(String),
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionEventKind {
    Open,
    Disconnect,
}

/// Connection transition correlated with traffic on the liveness channel.
///
/// A `Disconnect` carries the last liveness message seen before the socket dropped. The
/// `Open` that follows carries the same message again together with the first liveness
/// message received afterwards, so a consumer can tell exactly where the gap is.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent<M> {
    pub kind: ConnectionEventKind,
    pub last_message: Option<M>,
    pub resume_message: Option<M>,
}

impl<M> ConnectionEvent<M> {
    pub(crate) fn open(last_message: Option<M>, resume_message: Option<M>) -> Self {
        Self {
            kind: ConnectionEventKind::Open,
            last_message,
            resume_message,
        }
    }

    pub(crate) fn disconnect(last_message: Option<M>) -> Self {
        Self {
            kind: ConnectionEventKind::Disconnect,
            last_message,
            resume_message: None,
        }
    }
}

/// Change in the set of tradable symbols.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct SymbolsDelta {
    #[builder(default)]
    pub added: Vec<String>,
    #[builder(default)]
    pub removed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_includes_symbol_when_present() {
        assert_eq!(Subscription::new("trade").key(), "trade");
        assert_eq!(
            Subscription::with_symbol("trade", "BTC/USDT").key(),
            "trade:BTC/USDT"
        );
    }

    #[test]
    fn options_do_not_change_identity() {
        let mut options = Map::new();
        options.insert("interval".to_owned(), json!("1m"));

        let sub = Subscription::builder()
            .channel("kline")
            .symbol("ETH/USDT")
            .options(options)
            .build();

        assert_eq!(sub.key(), "kline:ETH/USDT");
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({ "channel": "kline", "symbol": "ETH/USDT", "options": { "interval": "1m" } })
        );
    }

    #[test]
    fn channel_op_displays_lowercase() {
        assert_eq!(ChannelOp::Subscribe.to_string(), "subscribe");
        assert_eq!(ChannelOp::Unsubscribe.to_string(), "unsubscribe");
    }
}
