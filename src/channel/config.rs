#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

use crate::ws::Config;

/// Behaviour of a [`Multiplexer`](super::Multiplexer) on top of its connection.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct MultiplexerConfig {
    /// Settings for the underlying connection
    #[builder(default)]
    pub connection: Config,
    /// Start the connection when a subscription is added while it is not open
    #[builder(default = true)]
    pub auto_start_on_subscription: bool,
    /// Close every channel subject on shutdown so consumers can tell the client paused
    #[builder(default)]
    pub close_subjects_on_shutdown: bool,
    /// Forget all subscriptions on shutdown; a later start begins from nothing
    #[builder(default)]
    pub clear_subscriptions_on_shutdown: bool,
    /// Channel whose traffic drives connection events and silent-stall detection
    pub liveness: Option<LivenessConfig>,
    /// Channels whose subscriptions follow the set of tradable symbols
    #[builder(default)]
    pub symbol_aware_channels: Vec<String>,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Designates the channel used as a liveness signal.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    pub channel: String,
    /// Reconnect when the channel has been silent this long while the socket is open
    pub stale_timeout: Option<Duration>,
}

impl LivenessConfig {
    #[must_use]
    pub fn new<S: Into<String>>(channel: S) -> Self {
        Self {
            channel: channel.into(),
            stale_timeout: None,
        }
    }

    #[must_use]
    pub fn stale_after(mut self, timeout: Duration) -> Self {
        self.stale_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_auto_start_and_keep_state() {
        let config = MultiplexerConfig::default();

        assert!(config.auto_start_on_subscription);
        assert!(!config.close_subjects_on_shutdown);
        assert!(!config.clear_subscriptions_on_shutdown);
        assert!(config.liveness.is_none());
        assert!(config.symbol_aware_channels.is_empty());
    }

    #[test]
    fn builder_sets_liveness() {
        let config = MultiplexerConfig::builder()
            .liveness(LivenessConfig::new("trade").stale_after(Duration::from_secs(30)))
            .symbol_aware_channels(vec!["trade".to_owned()])
            .build();

        let liveness = config.liveness.unwrap();
        assert_eq!(liveness.channel, "trade");
        assert_eq!(liveness.stale_timeout, Some(Duration::from_secs(30)));
    }
}
