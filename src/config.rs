//! RelayGate configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main RelayGate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayGateConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Static webhook fallback configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// AI backend configuration
    #[serde(default)]
    pub ai: AiBackendConfig,

    /// Pairing (QR) configuration
    #[serde(default)]
    pub pairing: PairingConfig,

    /// Per-agent admission limits
    #[serde(default)]
    pub limits: RateLimitConfig,

    /// Auto-forward configuration
    #[serde(default)]
    pub forward: AutoForwardConfig,

    /// Outbound media configuration
    #[serde(default)]
    pub media: MediaConfig,
}

impl RelayGateConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Overlay values from the process environment.
    ///
    /// `RELAYGATE_WEBHOOK` is a comma separated list of URLs.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(urls) = lookup("RELAYGATE_WEBHOOK") {
            self.webhook.urls = split_list(&urls);
        }
        if let Some(secret) = lookup("RELAYGATE_WEBHOOK_SECRET") {
            self.webhook.secret = secret;
        }
        if let Some(url) = lookup("RELAYGATE_AI_BACKEND_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                self.ai.base_url = url.to_string();
            }
        }
        if let Some(dir) = lookup("RELAYGATE_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir.trim());
            }
        }
    }
}

/// Split a comma separated list, dropping blank entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all persisted state
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Directory holding one credential store per agent
    pub fn credentials_dir(&self) -> PathBuf {
        self.data_dir.join("credentials")
    }

    /// Directory holding session, API key and webhook records
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("relaygate"),
        }
    }
}

/// Static webhook configuration, used when neither the agent nor the
/// tenant has a stored webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Destination URLs
    pub urls: Vec<String>,

    /// Shared secret for the signature header (empty disables signing)
    pub secret: String,

    /// Per-delivery timeout in seconds
    pub timeout_secs: u64,

    /// Lifetime of resolved webhook targets in seconds
    pub cache_ttl_secs: u64,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            secret: String::new(),
            timeout_secs: 10,
            cache_ttl_secs: 30,
        }
    }
}

/// AI backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiBackendConfig {
    /// Base URL used to build `{base_url}/agents/{agent_id}/execute`
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// `max_steps` sent when the caller supplies no parameters
    pub default_max_steps: u32,
}

impl AiBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Default run endpoint for an agent
    pub fn endpoint_for(&self, agent_id: &str) -> String {
        format!(
            "{}/agents/{}/execute",
            self.base_url.trim_end_matches('/'),
            agent_id
        )
    }
}

impl Default for AiBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 60,
            default_max_steps: 5,
        }
    }
}

/// Pairing (QR) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// How long session creation waits for the first code, in seconds
    pub timeout_secs: u64,

    /// Cached codes older than this are not served, in seconds
    pub qr_max_age_secs: u64,

    /// Cache polls while another caller is mid-pairing
    pub poll_attempts: u32,

    /// Delay between cache polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Wait for one more code on an existing connection, in seconds
    pub next_code_timeout_secs: u64,

    /// Minimum edge length of the rendered QR image, in pixels
    pub qr_size: u32,
}

impl PairingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn qr_max_age(&self) -> Duration {
        Duration::from_secs(self.qr_max_age_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn next_code_timeout(&self) -> Duration {
        Duration::from_secs(self.next_code_timeout_secs)
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            qr_max_age_secs: 60,
            poll_attempts: 3,
            poll_interval_ms: 3000,
            next_code_timeout_secs: 8,
            qr_size: 256,
        }
    }
}

/// Per-agent admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Token refill rate
    pub permits_per_minute: u32,

    /// Bucket capacity
    pub burst: u32,

    /// Admission queue capacity; excess requests are rejected
    pub queue_capacity: usize,

    /// Maximum wait for a token once admitted, in milliseconds
    pub wait_timeout_ms: u64,
}

impl RateLimitConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            permits_per_minute: 100,
            burst: 100,
            queue_capacity: 500,
            wait_timeout_ms: 30_000,
        }
    }
}

/// Auto-forward configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoForwardConfig {
    /// Relay eligible inbound messages to the AI backend
    pub enabled: bool,

    /// Skip chats addressed to the agent's own identity
    pub skip_self_chat: bool,

    /// Answer group messages that address the agent
    pub respond_in_groups: bool,

    /// `max_steps` sent with auto-forwarded runs
    pub max_steps: u32,
}

impl Default for AutoForwardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_self_chat: true,
            respond_in_groups: true,
            max_steps: 3,
        }
    }
}

/// Outbound media configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Largest accepted payload in bytes
    pub max_bytes: usize,

    /// Download timeout for URL sources, in seconds
    pub download_timeout_secs: u64,
}

impl MediaConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            download_timeout_secs: 30,
        }
    }
}
