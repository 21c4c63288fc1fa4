//! Per-agent admission control: bounded queue in front of a token bucket

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

/// Classic token bucket, refilled continuously
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, per_minute: u32) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec: per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.refill_per_sec <= 0.0 {
            return Err(Duration::from_secs(60));
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec).max(Duration::from_millis(1)))
    }
}

/// Holds an admission-queue slot until dropped
#[derive(Debug)]
pub struct Admission {
    _slot: OwnedSemaphorePermit,
}

/// Limiter of one agent
#[derive(Debug)]
pub struct AgentLimiter {
    bucket: Mutex<TokenBucket>,
    queue: Arc<Semaphore>,
}

impl AgentLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config.burst, config.permits_per_minute)),
            queue: Arc::new(Semaphore::new(config.queue_capacity)),
        }
    }

    /// Enter the queue and wait for a token.
    ///
    /// A full queue fails immediately with `RateLimited`. Waiting longer than
    /// `wait` fails with `AdmissionTimeout`, frees the slot and consumes no
    /// token.
    pub async fn admit(&self, wait: Duration) -> Result<Admission> {
        let slot = self
            .queue
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::RateLimited("admission queue is full".to_string()))?;

        match tokio::time::timeout(wait, self.wait_for_token()).await {
            Ok(()) => Ok(Admission { _slot: slot }),
            Err(_) => Err(Error::AdmissionTimeout(format!(
                "no rate-limit token within {:?}",
                wait
            ))),
        }
    }

    /// Free queue slots right now
    pub fn available_slots(&self) -> usize {
        self.queue.available_permits()
    }

    async fn wait_for_token(&self) {
        loop {
            let delay = match self.bucket.lock().await.try_take(Instant::now()) {
                Ok(()) => return,
                Err(delay) => delay,
            };
            tokio::time::sleep(delay).await;
        }
    }
}

/// Lazily created limiters, one per agent
pub struct LimiterRegistry {
    config: RateLimitConfig,
    limiters: RwLock<HashMap<String, Arc<AgentLimiter>>>,
}

impl LimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout()
    }

    pub async fn for_agent(&self, agent_id: &str) -> Arc<AgentLimiter> {
        if let Some(limiter) = self.limiters.read().await.get(agent_id) {
            return limiter.clone();
        }
        self.limiters
            .write()
            .await
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AgentLimiter::new(&self.config)))
            .clone()
    }

    /// Admit one request for `agent_id`
    pub async fn admit(&self, agent_id: &str) -> Result<Admission> {
        self.for_agent(agent_id).await.admit(self.wait_timeout()).await
    }
}
