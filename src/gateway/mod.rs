//! Gateway for RelayGate
//!
//! Wires the connection registry, pairing controller, webhook dispatcher and
//! auto-forward pipeline together and routes protocol events between them.

mod router;
mod server;

pub use router::{EventRouter, WebhookEvent};
pub use server::{Gateway, GatewayBuilder, GatewayState, GatewayStatus};
