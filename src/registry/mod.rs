//! Connection registry
//!
//! Owns one protocol client and one isolated credential store per agent,
//! the pairing-code cache, and the per-connection event pumps that hand
//! inbound events to the gateway.

mod manager;
mod pairing_cache;

pub use manager::{ConnectionHandle, ConnectionRegistry};
pub use pairing_cache::{CachedPairingCode, PairingCodeCache};

use crate::protocol::ProtocolEvent;
use async_trait::async_trait;

/// Receives every event of every connection.
///
/// Events of one agent are delivered in order, one at a time.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, agent_id: &str, event: ProtocolEvent);
}
