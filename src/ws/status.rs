//! Read-only diagnostics exposed to operators and the monitor tool.
//!
//! Nothing in here is used for correctness decisions.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::connection::ConnectionState;

/// Number of connection spans retained for diagnostics.
pub const SPAN_HISTORY: usize = 5;

/// Lifetime of one opened socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSpan {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ConnectionSpan {
    pub(crate) fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: None,
            duration_ms: None,
        }
    }

    pub(crate) fn close(&mut self, end: DateTime<Utc>) {
        if self.end.is_none() {
            self.end = Some(end);
            self.duration_ms = Some((end - self.start).num_milliseconds());
        }
    }
}

/// Counters kept by a connection manager.
#[derive(Debug, Default, Clone)]
pub(crate) struct ConnectionCounters {
    pub(crate) first_attempt_at: Option<DateTime<Utc>>,
    pub(crate) attempts: u64,
    pub(crate) opens: u64,
    pub(crate) closes: u64,
    pub(crate) messages_sent: u64,
    pub(crate) messages_dropped: u64,
    pub(crate) messages_received: u64,
    pub(crate) pings_sent: u64,
    pub(crate) pongs_received: u64,
    pub(crate) spans: VecDeque<ConnectionSpan>,
}

impl ConnectionCounters {
    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
        self.first_attempt_at.get_or_insert_with(Utc::now);
    }

    pub(crate) fn record_open(&mut self) {
        self.opens += 1;
        if self.spans.len() == SPAN_HISTORY {
            self.spans.pop_front();
        }
        self.spans.push_back(ConnectionSpan::open(Utc::now()));
    }

    pub(crate) fn record_close(&mut self) {
        self.closes += 1;
        if let Some(span) = self.spans.back_mut() {
            span.close(Utc::now());
        }
    }
}

/// Point-in-time view of one connection.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub attempts: u64,
    pub opens: u64,
    pub closes: u64,
    pub current_delay_ms: u64,
    pub last_touch_ago_ms: Option<u64>,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub messages_received: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub spans: Vec<ConnectionSpan>,
}

/// Point-in-time view of one channel subject.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub receivers: usize,
}

/// Subscription keys by lifecycle stage.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionStatus {
    pub pending: Vec<String>,
    pub completed: Vec<String>,
}

/// Everything a monitor needs to know about one multiplexed client.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct WsStatus {
    pub connection: ConnectionStatus,
    pub subscriptions: SubscriptionStatus,
    pub channels: Vec<ChannelStatus>,
}

impl fmt::Display for WsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = &self.connection;
        write!(
            f,
            "state={} attempts={} opens={} closes={} delay={}ms",
            connection.state,
            connection.attempts,
            connection.opens,
            connection.closes,
            connection.current_delay_ms,
        )?;
        if let Some(ago) = connection.last_touch_ago_ms {
            write!(f, " touch={ago}ms")?;
        }
        write!(
            f,
            " sent={} dropped={} recv={} subs={}/{}",
            connection.messages_sent,
            connection.messages_dropped,
            connection.messages_received,
            self.subscriptions.completed.len(),
            self.subscriptions.pending.len(),
        )?;
        for channel in &self.channels {
            write!(f, " [{}:{}]", channel.channel, channel.message_count)?;
        }
        Ok(())
    }
}
