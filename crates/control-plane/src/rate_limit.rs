use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::channel::Channel;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited,
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        self == RateDecision::Allowed
    }
}

/// Fixed-window, per-channel admission control.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one selection of `channel_id` against `limit` per window.
    async fn try_acquire(&self, channel_id: i64, limit: u32) -> RateDecision;

    /// Observability counter, separate from the admission count.
    fn record_usage(&self, _channel_id: i64) {}

    fn usage(&self, _channel_id: i64) -> u64 {
        0
    }

    /// Unlimited channels pass without touching the limiter state.
    async fn admit(&self, channel: &Channel) -> RateDecision {
        match channel.effective_rate_limit() {
            None => RateDecision::Allowed,
            Some(limit) => self.try_acquire(channel.id, limit).await,
        }
    }
}

#[derive(Clone, Debug)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

#[derive(Default)]
struct LocalState {
    windows: HashMap<i64, WindowState>,
    usage: HashMap<i64, u64>,
}

/// Process-local limiter for single-instance deployments.
#[derive(Clone)]
pub struct LocalRateLimiter {
    state: Arc<Mutex<LocalState>>,
    window: Duration,
}

impl LocalRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState::default())),
            window,
        }
    }

    pub fn shared(window: Duration) -> Arc<Self> {
        Arc::new(Self::new(window))
    }

    fn check(&self, channel_id: i64, limit: u32) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(entry) = state.windows.get_mut(&channel_id) else {
            state.windows.insert(
                channel_id,
                WindowState {
                    count: 1,
                    reset_at: now + self.window,
                },
            );
            return RateDecision::Allowed;
        };
        if now >= entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + self.window;
            return RateDecision::Allowed;
        }
        if entry.count < limit {
            entry.count += 1;
            return RateDecision::Allowed;
        }
        RateDecision::Limited
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn try_acquire(&self, channel_id: i64, limit: u32) -> RateDecision {
        self.check(channel_id, limit)
    }

    fn record_usage(&self, channel_id: i64) {
        *self.state.lock().usage.entry(channel_id).or_insert(0) += 1;
    }

    fn usage(&self, channel_id: i64) -> u64 {
        self.state
            .lock()
            .usage
            .get(&channel_id)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store command failed: {0}")]
    Command(String),
    #[error("counter value is not an integer: {0:?}")]
    Corrupt(String),
}

/// Minimal GET/SET-with-expiry surface of an external key-value store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CounterStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SharedRateLimitConfig {
    pub key_prefix: String,
    pub window: Duration,
    /// Deadline for one check, covering both store round trips.
    pub timeout: Duration,
}

impl Default for SharedRateLimitConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rate_limit".to_string(),
            window: DEFAULT_WINDOW,
            timeout: Duration::from_millis(500),
        }
    }
}

/// Limiter backed by a store shared between instances.
///
/// Any store failure, unparsable counter, or missed deadline denies the
/// candidate: the upstream is protected at the cost of a lost selection.
/// Every rewrite resets the expiry, so a channel that stays busy keeps its
/// counter alive past the nominal window.
#[derive(Clone)]
pub struct SharedRateLimiter {
    store: Arc<dyn CounterStore>,
    config: SharedRateLimitConfig,
}

impl SharedRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: SharedRateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn key(&self, channel_id: i64) -> String {
        format!("{}:{}", self.config.key_prefix, channel_id)
    }

    async fn check(&self, key: &str, limit: u32) -> Result<RateDecision, CounterStoreError> {
        let Some(raw) = self.store.get(key).await? else {
            self.store.set(key, "1", self.config.window).await?;
            return Ok(RateDecision::Allowed);
        };
        let count: u64 = raw
            .trim()
            .parse()
            .map_err(|_| CounterStoreError::Corrupt(raw.clone()))?;
        if count >= u64::from(limit) {
            return Ok(RateDecision::Limited);
        }
        self.store
            .set(key, &(count + 1).to_string(), self.config.window)
            .await?;
        Ok(RateDecision::Allowed)
    }
}

#[async_trait]
impl RateLimiter for SharedRateLimiter {
    async fn try_acquire(&self, channel_id: i64, limit: u32) -> RateDecision {
        let key = self.key(channel_id);
        match tokio::time::timeout(self.config.timeout, self.check(&key, limit)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                warn!(channel_id, error = %err, "shared rate limit check failed, denying channel");
                RateDecision::Limited
            }
            Err(_) => {
                warn!(
                    channel_id,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "shared rate limit check timed out, denying channel"
                );
                RateDecision::Limited
            }
        }
    }
}
