//! Boundary with the external messaging-protocol library
//!
//! The gateway never speaks the wire protocol itself. It drives clients
//! through [`ProtocolClient`], obtains them from a [`ClientFactory`] and
//! gives each agent its own [`CredentialStore`].

pub mod client;
pub mod credentials;
pub mod jid;
#[cfg(any(test, feature = "mock-client"))]
pub mod mock;
pub mod types;

pub use client::{ClientFactory, CredentialStore, CredentialStoreProvider, EventHook, ProtocolClient};
pub use credentials::{validate_agent_id, FileCredentialStore, FileCredentialStoreProvider};
pub use types::*;
