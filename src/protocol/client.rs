//! Traits at the boundary with the external protocol library

use super::types::*;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback the protocol library invokes for every event of one connection.
///
/// Must return quickly; the registry only enqueues the event.
pub type EventHook = Arc<dyn Fn(ProtocolEvent) + Send + Sync>;

/// One live protocol client, bound to a single device identity
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the transport. Unpaired devices start emitting pairing codes.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Connected and logged in with a paired device
    fn is_authenticated(&self) -> bool;

    /// Account identity of the paired device, `None` before pairing
    fn own_identity(&self) -> Option<AgentIdentity>;

    /// Subscribe to rotating pairing codes.
    ///
    /// Must be called before `connect` for the initial pairing. Fails with
    /// `PairingAlreadyExists` when the device is already paired.
    async fn subscribe_pairing_codes(&self) -> Result<mpsc::Receiver<PairingCodeEvent>>;

    /// Send a text message, returning the message id
    async fn send_text(&self, to: &str, text: &str) -> Result<String>;

    async fn send_presence(&self, to: &str, presence: Presence) -> Result<()>;

    async fn upload_media(&self, data: Bytes, kind: MediaKind) -> Result<UploadedMedia>;

    /// Send previously uploaded media, returning the message id
    async fn send_media(&self, to: &str, media: OutgoingMedia) -> Result<String>;
}

/// Persistent state for one device identity
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored device, creating and persisting a fresh one if empty
    async fn load_or_create_device(&self) -> Result<DeviceIdentity>;

    async fn save_device(&self, device: &DeviceIdentity) -> Result<()>;

    /// Release the underlying resources; further writes fail
    async fn close(&self) -> Result<()>;

    /// Remove everything the store persisted
    async fn erase(&self) -> Result<()>;

    /// Where the store lives (path or connection string)
    fn location(&self) -> String;
}

/// Opens one isolated credential store per agent
#[async_trait]
pub trait CredentialStoreProvider: Send + Sync {
    async fn open(&self, agent_id: &str) -> Result<Arc<dyn CredentialStore>>;
}

/// Builds protocol clients for the registry
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        agent_id: &str,
        device: DeviceIdentity,
        store: Arc<dyn CredentialStore>,
        hook: EventHook,
    ) -> Result<Arc<dyn ProtocolClient>>;
}
