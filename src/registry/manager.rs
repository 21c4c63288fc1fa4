//! Agent to connection mapping

use super::pairing_cache::{CachedPairingCode, PairingCodeCache};
use super::EventSink;
use crate::error::Result;
use crate::protocol::{
    ClientFactory, CredentialStore, CredentialStoreProvider, EventHook, ProtocolClient,
    ProtocolEvent,
};
use crate::store::SessionState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

type ConnectionMap = RwLock<HashMap<String, Arc<ConnectionHandle>>>;
type SinkSlot = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

/// Live connection of one agent
pub struct ConnectionHandle {
    /// Distinguishes successive connections of the same agent
    pub id: Uuid,
    pub agent_id: String,
    pub client: Arc<dyn ProtocolClient>,
    pub store: Arc<dyn CredentialStore>,
    pub created_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// Live state of the client
    pub fn state(&self) -> SessionState {
        SessionState::from_flags(self.client.is_connected(), self.client.is_authenticated())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("store", &self.store.location())
            .field("state", &self.state())
            .finish()
    }
}

/// Registry of live per-agent connections
pub struct ConnectionRegistry {
    provider: Arc<dyn CredentialStoreProvider>,
    factory: Arc<dyn ClientFactory>,
    connections: Arc<ConnectionMap>,
    codes: PairingCodeCache,
    sink: SinkSlot,
}

impl ConnectionRegistry {
    pub fn new(provider: Arc<dyn CredentialStoreProvider>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            provider,
            factory,
            connections: Arc::new(RwLock::new(HashMap::new())),
            codes: PairingCodeCache::new(),
            sink: Arc::new(RwLock::new(None)),
        }
    }

    /// Install the subscriber for inbound events
    pub async fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().await = Some(sink);
    }

    /// Return the agent's connection, creating it on first use.
    ///
    /// Creation holds the exclusive lock, so racing callers for the same
    /// agent all receive the one handle that was stored.
    pub async fn acquire_connection(&self, agent_id: &str) -> Result<Arc<ConnectionHandle>> {
        if let Some(handle) = self.connections.read().await.get(agent_id) {
            return Ok(handle.clone());
        }

        let mut connections = self.connections.write().await;
        if let Some(handle) = connections.get(agent_id) {
            return Ok(handle.clone());
        }

        let store = self.provider.open(agent_id).await?;
        let device = match store.load_or_create_device().await {
            Ok(device) => device,
            Err(e) => {
                let _ = store.close().await;
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let hook_agent = agent_id.to_string();
        let hook: EventHook = Arc::new(move |event| {
            if tx.send(event).is_err() {
                tracing::debug!(agent = %hook_agent, "Event pump closed, dropping event");
            }
        });

        let client = match self.factory.build(agent_id, device, store.clone(), hook) {
            Ok(client) => client,
            Err(e) => {
                let _ = store.close().await;
                return Err(e);
            }
        };

        let handle = Arc::new(ConnectionHandle {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            client,
            store,
            created_at: Utc::now(),
        });
        self.spawn_event_pump(agent_id.to_string(), handle.id, rx);
        connections.insert(agent_id.to_string(), handle.clone());

        tracing::info!(
            agent = %agent_id,
            store = %handle.store.location(),
            "Created connection"
        );
        Ok(handle)
    }

    /// Look up an agent's connection without creating one
    pub async fn get_connection(&self, agent_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(agent_id).cloned()
    }

    /// Disconnect the agent, erase its credential store and drop its cached
    /// code. No-op when the agent has no connection.
    pub async fn release_connection(&self, agent_id: &str) -> Result<()> {
        let removed = remove_connection(&self.connections, agent_id, None).await;
        self.codes.clear(agent_id).await;
        match removed {
            Some(result) => result,
            None => {
                tracing::debug!(agent = %agent_id, "No connection to release");
                Ok(())
            }
        }
    }

    /// Disconnect every client, keeping credential stores on disk
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.connections.write().await.drain().collect();
        for (agent_id, handle) in handles {
            handle.client.disconnect().await;
            if let Err(e) = handle.store.close().await {
                tracing::warn!(agent = %agent_id, "Failed to close credential store: {}", e);
            }
        }
    }

    pub async fn cache_pairing_code(&self, agent_id: &str, code: CachedPairingCode) {
        self.codes.put(agent_id, code).await;
    }

    pub async fn cached_pairing_code(&self, agent_id: &str) -> Option<CachedPairingCode> {
        self.codes.get(agent_id).await
    }

    /// Shared handle on the pairing-code cache
    pub fn pairing_codes(&self) -> PairingCodeCache {
        self.codes.clone()
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Drain one connection's events in order.
    ///
    /// A pairing failure discards that connection (if it is still the
    /// current one for the agent). Sink work runs in its own task so a
    /// panicking subscriber cannot stop the pump.
    fn spawn_event_pump(
        &self,
        agent_id: String,
        connection_id: Uuid,
        mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    ) {
        let connections: Weak<ConnectionMap> = Arc::downgrade(&self.connections);
        let codes = self.codes.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let ProtocolEvent::PairError { reason } = &event {
                    tracing::warn!(
                        agent = %agent_id,
                        "Pairing failed, discarding connection: {}",
                        reason
                    );
                    if let Some(connections) = connections.upgrade() {
                        if let Some(result) =
                            remove_connection(&connections, &agent_id, Some(connection_id)).await
                        {
                            codes.clear(&agent_id).await;
                            if let Err(e) = result {
                                tracing::warn!(agent = %agent_id, "Failed to reset connection: {}", e);
                            }
                        }
                    }
                }

                let current = sink.read().await.clone();
                let Some(current) = current else {
                    tracing::debug!(agent = %agent_id, event = event.name(), "No event sink installed");
                    continue;
                };
                let agent = agent_id.clone();
                let task = tokio::spawn(async move { current.on_event(&agent, event).await });
                if let Err(e) = task.await {
                    tracing::warn!(agent = %agent_id, "Event subscriber failed: {}", e);
                }
            }
            tracing::debug!(agent = %agent_id, connection = %connection_id, "Event pump stopped");
        });
    }
}

/// Remove an agent's connection and tear it down.
///
/// The handle is taken out under the exclusive lock; disconnecting and
/// erasing happen after the lock is released. With `only_id`, nothing
/// happens unless the stored connection has that id. Returns `None` when
/// nothing was removed.
async fn remove_connection(
    connections: &ConnectionMap,
    agent_id: &str,
    only_id: Option<Uuid>,
) -> Option<Result<()>> {
    let handle = {
        let mut connections = connections.write().await;
        if let Some(id) = only_id {
            if connections.get(agent_id).map(|h| h.id) != Some(id) {
                return None;
            }
        }
        connections.remove(agent_id)?
    };

    handle.client.disconnect().await;
    if let Err(e) = handle.store.close().await {
        tracing::warn!(agent = %agent_id, "Failed to close credential store: {}", e);
    }
    let result = handle.store.erase().await;
    tracing::info!(
        agent = %agent_id,
        store = %handle.store.location(),
        "Released connection"
    );
    Some(result)
}
