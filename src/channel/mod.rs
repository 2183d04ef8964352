//! Channel multiplexing over one [`ConnectionManager`](crate::ws::ConnectionManager).
//!
//! # Architecture
//!
//! - [`Multiplexer`]: Subscription bookkeeping, replay after reconnect, per-channel subjects,
//!   and derived connection events
//! - [`Connector`]: The exchange-specific part: endpoint, subscribe/unsubscribe encoding,
//!   and inbound message parsing
//!
//! Subscriptions move from pending to completed once they were sent on the current
//! socket. When a new socket opens, every completed subscription is moved back to pending
//! and sent again, so whatever was subscribed before a disconnect is subscribed after it
//! without any action from the caller.

pub mod client;
pub mod config;
pub mod connector;
pub(crate) mod subject;
pub(crate) mod subscription;
pub mod types;

pub use client::Multiplexer;
pub use config::{LivenessConfig, MultiplexerConfig};
pub use connector::{Connector, Publisher};
pub use types::{
    ChannelEvent, ChannelOp, ConnectionEvent, ConnectionEventKind, Subscription, SymbolsDelta,
};
