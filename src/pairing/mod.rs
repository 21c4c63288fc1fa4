//! Pairing controller: QR state machine and session records

mod controller;
mod render;
mod types;

pub use controller::PairingController;
pub use render::render_qr_png;
pub use types::{CreateSessionRequest, CreateSessionResponse, SessionStatus};
