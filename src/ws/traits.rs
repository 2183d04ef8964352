//! Core traits for generic WebSocket infrastructure.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// Hooks the [`ConnectionManager`](super::ConnectionManager) calls into.
///
/// The connection layer knows nothing about channels or subscriptions. Everything
/// above it (the channel multiplexer, or a hand-rolled client) plugs in here.
///
/// All callbacks except [`address`](Self::address) are invoked synchronously from
/// the socket's I/O task or the health-check loop and must not block.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ConnectionHandler for Echo {
///     async fn address(&self) -> Result<Url> {
///         Ok(Url::parse("wss://echo.example.com")?)
///     }
///
///     fn on_message(&self, message: Value) -> Result<()> {
///         println!("{message}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Resolve the endpoint for the next connection attempt.
    ///
    /// Called once per attempt, so signed or short-lived URLs can be refreshed here.
    async fn address(&self) -> crate::Result<Url>;

    /// Handle one decoded inbound JSON message.
    ///
    /// Errors are logged by the caller and never affect the connection.
    fn on_message(&self, message: Value) -> crate::Result<()>;

    /// The socket is open and ready to carry traffic.
    fn on_open(&self) {}

    /// An open socket went away, either unexpectedly or because it was torn down for a
    /// reconnect or shutdown.
    fn on_close(&self) {}

    /// Force a reconnect for reasons the socket itself can't detect.
    ///
    /// Only consulted while the connection reports open.
    fn check_need_reconnect(&self) -> bool {
        false
    }

    /// Final cleanup after [`shutdown`](super::ConnectionManager::shutdown) was requested.
    fn on_shutdown(&self) {}
}
