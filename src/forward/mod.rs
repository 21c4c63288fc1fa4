//! Auto-forward pipeline
//!
//! Inbound chat messages pass admission control, an eligibility filter and
//! text extraction before being sent to the agent's AI backend. The reply is
//! sanitized and delivered back into the originating chat.

pub mod backend;
pub mod eligibility;
pub mod limiter;
pub mod media;
mod pipeline;
pub mod sanitize;
pub mod text;
mod types;

pub use backend::AiClient;
pub use eligibility::{Eligibility, SkipReason};
pub use limiter::{Admission, AgentLimiter, LimiterRegistry};
pub use media::{LoadedMedia, MediaLoader};
pub use pipeline::AutoForwardPipeline;
pub use sanitize::ReplySanitizer;
pub use types::*;
