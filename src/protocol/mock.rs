//! In-process protocol client for tests and local development
//!
//! `MockClient` keeps its connection state in memory, records everything it
//! is asked to send and plays back a scripted pairing-code stream.

use super::client::{ClientFactory, CredentialStore, EventHook, ProtocolClient};
use super::types::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted behavior shared by every client a factory builds
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Events played back on each pairing-code subscription
    pub pairing_events: Vec<PairingCodeEvent>,
    /// Delay between pairing events
    pub event_interval: Duration,
    pub fail_connect: bool,
    pub fail_send: bool,
    /// How long `disconnect` takes
    pub disconnect_delay: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            pairing_events: vec![
                PairingCodeEvent::code("2@mock-code-1"),
                PairingCodeEvent::code("2@mock-code-2"),
            ],
            event_interval: Duration::from_millis(20),
            fail_connect: false,
            fail_send: false,
            disconnect_delay: Duration::ZERO,
        }
    }
}

/// A text message recorded by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub to: String,
    pub text: String,
}

pub struct MockClient {
    agent_id: String,
    store: Arc<dyn CredentialStore>,
    device: Mutex<DeviceIdentity>,
    hook: EventHook,
    behavior: Mutex<MockBehavior>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    pending_codes: Mutex<Option<mpsc::Sender<PairingCodeEvent>>>,
    sent: Mutex<Vec<SentText>>,
    media: Mutex<Vec<(String, OutgoingMedia)>>,
    presences: Mutex<Vec<(String, Presence)>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    subscriptions: AtomicUsize,
}

impl MockClient {
    pub fn new(
        agent_id: &str,
        device: DeviceIdentity,
        store: Arc<dyn CredentialStore>,
        hook: EventHook,
        behavior: MockBehavior,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            store,
            device: Mutex::new(device),
            hook,
            behavior: Mutex::new(behavior),
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            pending_codes: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            media: Mutex::new(Vec::new()),
            presences: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Location of the credential store this client was built with
    pub fn store_location(&self) -> String {
        self.store.location()
    }

    /// Simulate the user scanning a code
    pub async fn complete_pairing(&self, jid: &str) {
        let device = {
            let mut device = lock(&self.device);
            device.registered_jid = Some(jid.to_string());
            device.clone()
        };
        if let Err(e) = self.store.save_device(&device).await {
            tracing::debug!(agent = %self.agent_id, "Mock store save failed: {}", e);
        }
        self.connected.store(true, Ordering::SeqCst);
        self.authenticated.store(true, Ordering::SeqCst);
        (self.hook)(ProtocolEvent::PairSuccess {
            jid: jid.to_string(),
        });
    }

    /// Force the connection state
    pub fn set_state(&self, connected: bool, authenticated: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Mark the device as paired without touching connection state
    pub fn set_identity(&self, jid: &str) {
        lock(&self.device).registered_jid = Some(jid.to_string());
    }

    pub fn set_fail_send(&self, fail: bool) {
        lock(&self.behavior).fail_send = fail;
    }

    /// Deliver an event through the registered hook
    pub fn emit(&self, event: ProtocolEvent) {
        (self.hook)(event);
    }

    pub fn sent_texts(&self) -> Vec<SentText> {
        lock(&self.sent).clone()
    }

    pub fn sent_media(&self) -> Vec<(String, OutgoingMedia)> {
        lock(&self.media).clone()
    }

    pub fn presences(&self) -> Vec<(String, Presence)> {
        lock(&self.presences).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn play_pairing_events(&self, tx: mpsc::Sender<PairingCodeEvent>) {
        let behavior = lock(&self.behavior).clone();
        tokio::spawn(async move {
            for event in behavior.pairing_events {
                if tx.send(event).await.is_err() {
                    break;
                }
                tokio::time::sleep(behavior.event_interval).await;
            }
        });
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if lock(&self.behavior).fail_connect {
            return Err(Error::Protocol("mock connect failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);

        if lock(&self.device).is_registered() {
            self.authenticated.store(true, Ordering::SeqCst);
            (self.hook)(ProtocolEvent::Connected);
        } else if let Some(tx) = lock(&self.pending_codes).take() {
            self.play_pairing_events(tx);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let delay = lock(&self.behavior).disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        lock(&self.pending_codes).take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn own_identity(&self) -> Option<AgentIdentity> {
        lock(&self.device).agent_identity()
    }

    async fn subscribe_pairing_codes(&self) -> Result<mpsc::Receiver<PairingCodeEvent>> {
        if lock(&self.device).is_registered() {
            return Err(Error::PairingAlreadyExists(self.agent_id.clone()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        if self.is_connected() {
            self.play_pairing_events(tx);
        } else {
            *lock(&self.pending_codes) = Some(tx);
        }
        Ok(rx)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        if lock(&self.behavior).fail_send {
            return Err(Error::Protocol("mock send failure".to_string()));
        }
        lock(&self.sent).push(SentText {
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn send_presence(&self, to: &str, presence: Presence) -> Result<()> {
        lock(&self.presences).push((to.to_string(), presence));
        Ok(())
    }

    async fn upload_media(&self, data: Bytes, kind: MediaKind) -> Result<UploadedMedia> {
        Ok(UploadedMedia {
            url: format!("https://mmg.example.invalid/{:?}", kind).to_lowercase(),
            direct_path: format!("/mock/{}", uuid::Uuid::new_v4()),
            file_length: data.len() as u64,
        })
    }

    async fn send_media(&self, to: &str, media: OutgoingMedia) -> Result<String> {
        if lock(&self.behavior).fail_send {
            return Err(Error::Protocol("mock send failure".to_string()));
        }
        lock(&self.media).push((to.to_string(), media));
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

/// Factory that records every client it builds
#[derive(Default)]
pub struct MockClientFactory {
    behavior: Mutex<MockBehavior>,
    clients: Mutex<Vec<Arc<MockClient>>>,
}

impl MockClientFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn build_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Every client built for `agent_id`, oldest first
    pub fn clients_for(&self, agent_id: &str) -> Vec<Arc<MockClient>> {
        lock(&self.clients)
            .iter()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Most recent client built for `agent_id`
    pub fn latest(&self, agent_id: &str) -> Option<Arc<MockClient>> {
        self.clients_for(agent_id).pop()
    }
}

impl ClientFactory for MockClientFactory {
    fn build(
        &self,
        agent_id: &str,
        device: DeviceIdentity,
        store: Arc<dyn CredentialStore>,
        hook: EventHook,
    ) -> Result<Arc<dyn ProtocolClient>> {
        let behavior = lock(&self.behavior).clone();
        let client = Arc::new(MockClient::new(agent_id, device, store, hook, behavior));
        lock(&self.clients).push(client.clone());
        Ok(client)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
