#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_CHECK_INTERVAL_DURATION: Duration = Duration::from_secs(6);
const DEFAULT_LAST_TOUCH_TIMEOUT_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_RECONNECT_SETTLE_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MIN_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_INITIAL_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(120);
const DEFAULT_STABLE_GRACE_DURATION: Duration = Duration::from_secs(4);
const DEFAULT_DELAY_MULTIPLIER: f64 = 2.0;

/// Configuration for WebSocket connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Send a `ping` frame once this much time has passed since the last ping or pong
    pub ping_interval: Duration,
    /// Period of the health-check loop
    pub health_check_interval: Duration,
    /// Reconnect when no inbound traffic has been seen for this long
    pub last_touch_timeout: Duration,
    /// Upper bound for resolving the address and completing the handshake
    pub connect_timeout: Duration,
    /// Force shutdown to complete if the socket does not acknowledge the close in time
    pub shutdown_timeout: Duration,
    /// Pause between closing an old socket and opening its replacement
    pub reconnect_settle: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL_DURATION,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL_DURATION,
            last_touch_timeout: DEFAULT_LAST_TOUCH_TIMEOUT_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_DURATION,
            reconnect_settle: DEFAULT_RECONNECT_SETTLE_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The wait between two connect attempts is always `min_interval` plus the current
/// extra delay. The extra delay starts at zero, grows from `initial_delay` by
/// `multiplier` on every attempt made before a connection stayed open for
/// `stable_grace`, and is capped at `max_delay`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Minimum spacing between two connect attempts
    pub min_interval: Duration,
    /// First non-zero extra delay
    pub initial_delay: Duration,
    /// Maximum extra delay
    pub max_delay: Duration,
    /// Multiplier for exponential growth of the extra delay
    pub multiplier: f64,
    /// How long a connection must stay open before the extra delay resets
    pub stable_grace: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_RECONNECT_MIN_INTERVAL_DURATION,
            initial_delay: DEFAULT_INITIAL_DELAY_DURATION,
            max_delay: DEFAULT_MAX_DELAY_DURATION,
            multiplier: DEFAULT_DELAY_MULTIPLIER,
            stable_grace: DEFAULT_STABLE_GRACE_DURATION,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_delay)
            .with_max_interval(config.max_delay)
            .with_multiplier(config.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Extra reconnect delay, starting at zero.
#[derive(Debug)]
pub(crate) struct ReconnectBackoff {
    current: Duration,
    max: Duration,
    inner: ExponentialBackoff,
}

impl ReconnectBackoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self {
            current: Duration::ZERO,
            max: config.max_delay,
            inner: config.clone().into(),
        }
    }

    /// The delay to add on top of the minimum interval for the next attempt.
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay after an attempt made before the connection became stable.
    pub(crate) fn advance(&mut self) {
        self.current = self.inner.next_backoff().unwrap_or(self.max).min(self.max);
    }

    pub(crate) fn reset(&mut self) {
        self.inner.reset();
        self.current = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles_from_zero_and_caps() {
        let mut backoff = ReconnectBackoff::new(&ReconnectConfig::default());

        let mut observed = vec![backoff.current().as_millis()];
        for _ in 0..9 {
            backoff.advance();
            observed.push(backoff.current().as_millis());
        }

        assert_eq!(
            observed,
            vec![
                0, 1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 120_000, 120_000
            ]
        );
    }

    #[test]
    fn backoff_resets_to_zero() {
        let mut backoff = ReconnectBackoff::new(&ReconnectConfig::default());
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(2));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);

        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_respects_custom_max() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            ..ReconnectConfig::default()
        };
        let mut backoff = ReconnectBackoff::new(&config);

        for _ in 0..10 {
            backoff.advance();
        }

        assert_eq!(backoff.current(), Duration::from_millis(250));
    }

    #[test]
    fn default_intervals() {
        let config = Config::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.health_check_interval, Duration::from_secs(6));
        assert_eq!(config.last_touch_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.min_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect.stable_grace, Duration::from_secs(4));
    }
}
