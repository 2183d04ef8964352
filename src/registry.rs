//! Explicit registry of running clients, owned by whoever composes the process.

use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::{Connector, Multiplexer};
use crate::ws::WsStatus;

/// A client the registry can stop and inspect.
pub trait ManagedClient: Send + Sync + 'static {
    fn stop(&self);

    fn status(&self) -> WsStatus;

    fn snapshot(&self) -> String {
        self.status().to_string()
    }
}

impl<C: Connector> ManagedClient for Multiplexer<C> {
    fn stop(&self) {
        self.shutdown();
    }

    fn status(&self) -> WsStatus {
        self.collect_ws_status()
    }

    fn snapshot(&self) -> String {
        self.ws_status_snapshot()
    }
}

/// Clients by id. Registering a client under an id that is taken shuts the previous one down.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<dyn ManagedClient>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under `id`, shutting down and returning whatever was there.
    pub fn replace<S: Into<String>>(
        &self,
        id: S,
        client: Arc<dyn ManagedClient>,
    ) -> Option<Arc<dyn ManagedClient>> {
        let id = id.into();
        let previous = self.clients.insert(id.clone(), client)?;

        #[cfg(feature = "tracing")]
        tracing::info!(%id, "Replacing registered client, shutting down the previous one");
        #[cfg(not(feature = "tracing"))]
        let _ = &id;

        previous.stop();
        Some(previous)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn ManagedClient>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Unregister and shut down the client under `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn ManagedClient>> {
        let (_, client) = self.clients.remove(id)?;
        client.stop();
        Some(client)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Status of every registered client, sorted by id.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(String, WsStatus)> {
        let mut snapshots: Vec<(String, WsStatus)> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Shut down every registered client and forget them.
    pub fn shutdown_all(&self) {
        let clients: Vec<Arc<dyn ManagedClient>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.clients.clear();
        for client in clients {
            client.stop();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ws::status::{ConnectionStatus, SubscriptionStatus};
    use crate::ws::ConnectionState;

    #[derive(Default)]
    struct CountingClient {
        stops: AtomicUsize,
    }

    impl ManagedClient for CountingClient {
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn status(&self) -> WsStatus {
            WsStatus {
                connection: ConnectionStatus {
                    state: ConnectionState::NotConnected,
                    first_attempt_at: None,
                    attempts: 0,
                    opens: 0,
                    closes: 0,
                    current_delay_ms: 0,
                    last_touch_ago_ms: None,
                    messages_sent: 0,
                    messages_dropped: 0,
                    messages_received: 0,
                    pings_sent: 0,
                    pongs_received: 0,
                    spans: Vec::new(),
                },
                subscriptions: SubscriptionStatus::default(),
                channels: Vec::new(),
            }
        }
    }

    #[test]
    fn replace_stops_previous_client() {
        let registry = ClientRegistry::new();
        let first = Arc::new(CountingClient::default());
        let second = Arc::new(CountingClient::default());

        assert!(registry.replace("binance", Arc::clone(&first) as Arc<dyn ManagedClient>).is_none());
        let previous = registry.replace("binance", Arc::clone(&second) as Arc<dyn ManagedClient>);

        assert!(previous.is_some());
        assert_eq!(first.stops.load(Ordering::SeqCst), 1);
        assert_eq!(second.stops.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_and_shutdown_all_stop_clients() {
        let registry = ClientRegistry::new();
        let clients: Vec<Arc<CountingClient>> =
            (0..3).map(|_| Arc::new(CountingClient::default())).collect();
        for (n, client) in clients.iter().enumerate() {
            registry.replace(format!("client-{n}"), Arc::clone(client) as Arc<dyn ManagedClient>);
        }
        assert_eq!(registry.ids(), vec!["client-0", "client-1", "client-2"]);

        registry.remove("client-1");
        assert_eq!(clients[1].stops.load(Ordering::SeqCst), 1);
        assert!(registry.get("client-1").is_none());

        registry.shutdown_all();
        assert!(registry.is_empty());
        assert!(clients.iter().all(|client| client.stops.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn snapshots_are_sorted_by_id() {
        let registry = ClientRegistry::new();
        registry.replace("okx", Arc::new(CountingClient::default()) as Arc<dyn ManagedClient>);
        registry.replace("bybit", Arc::new(CountingClient::default()) as Arc<dyn ManagedClient>);

        let snapshots = registry.snapshots();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].0, "bybit");
        assert_eq!(snapshots[1].1.connection.state, ConnectionState::NotConnected);
        assert!(
            registry
                .get("okx")
                .unwrap()
                .snapshot()
                .starts_with("state=NOT_CONNECTED")
        );
    }
}
