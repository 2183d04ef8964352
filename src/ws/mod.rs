//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that knows nothing about the
//! messages it carries. Higher layers plug in through [`ConnectionHandler`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns one socket, answers and sends heartbeats, detects stale
//!   connections and reconnects with bounded backoff
//! - [`ConnectionHandler`]: Hooks for address resolution, decoded messages, and lifecycle events
//! - [`Transport`]: Opens physical sockets; [`TungsteniteTransport`] in production
//!
//! # Example
//!
//! ```ignore
//! let handler: Arc<dyn ConnectionHandler> = Arc::new(MyHandler::default());
//! let connection = ConnectionManager::new(Config::default(), Arc::downgrade(&handler));
//!
//! connection.start().await;
//! let mut states = connection.state_receiver();
//! while states.changed().await.is_ok() {
//!     println!("{}", *states.borrow());
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod status;
pub mod traits;
pub mod transport;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use status::{ChannelStatus, ConnectionSpan, ConnectionStatus, SubscriptionStatus, WsStatus};
pub use traits::*;
pub use transport::{Socket, Transport, TungsteniteTransport};
