//! RelayGate - Multi-tenant messaging gateway for AI agents
//!
//! RelayGate keeps one messaging-network connection per agent, pairs new
//! devices through QR codes, fans every inbound event out to webhooks and
//! relays qualifying chat messages to each agent's AI backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          RelayGate Gateway                        │
//! │                                                                   │
//! │  ┌──────────────────┐        ┌──────────────────────────────┐     │
//! │  │ Pairing          │───────▶│ Connection Registry          │     │
//! │  │ Controller       │        │  - one client per agent      │     │
//! │  │  - QR state      │        │  - isolated credential store │     │
//! │  │  - session rows  │        │  - pairing-code cache        │     │
//! │  └──────────────────┘        │  - ordered event pumps       │     │
//! │           ▲                  └──────────────┬───────────────┘     │
//! │           │ state changes                   │ events              │
//! │  ┌────────┴─────────────────────────────────▼───────────────┐     │
//! │  │                      Event Router                        │     │
//! │  └────────┬───────────────────────────────────┬─────────────┘     │
//! │           │                                   │                   │
//! │  ┌────────▼─────────┐              ┌──────────▼─────────────┐     │
//! │  │ Webhook          │              │ Auto-Forward Pipeline  │     │
//! │  │ Dispatcher       │              │  limiter → filter →    │     │
//! │  │  - fan-out       │              │  text → auth → AI →    │     │
//! │  │  - HMAC signing  │              │  sanitize → reply      │     │
//! │  └──────────────────┘              └────────────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: component wiring, lifecycle and event routing
//! - [`registry`]: per-agent connections and pairing-code cache
//! - [`pairing`]: QR pairing state machine and session records
//! - [`webhook`]: webhook resolution, signing and fan-out
//! - [`forward`]: admission control and AI auto-reply
//! - [`protocol`]: boundary with the messaging-protocol library
//! - [`store`]: persistence of sessions, API keys and webhook settings
//! - [`config`]: Configuration management

pub mod config;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod pairing;
pub mod protocol;
pub mod registry;
pub mod stats;
pub mod store;
pub mod webhook;

pub use config::RelayGateConfig;
pub use error::{Error, Result};
