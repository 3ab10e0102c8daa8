//! Per-provider circuit breaker for query generation.
//!
//! State lives behind `BreakerStore` so several processes can share it; the
//! in-memory store covers single-process deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn load(&self, provider: &str) -> BreakerState;
    async fn save(&self, provider: &str, state: BreakerState);
}

#[derive(Default)]
pub struct InMemoryBreakerStore {
    states: Mutex<HashMap<String, BreakerState>>,
}

impl InMemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn load(&self, provider: &str) -> BreakerState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(provider).copied().unwrap_or_default()
    }

    async fn save(&self, provider: &str, state: BreakerState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(provider.to_string(), state);
    }
}

/// Longest cooldown a breaker will hold a provider open for (one week).
pub const MAX_COOLDOWN_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn BreakerStore>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn BreakerStore>, failure_threshold: u32, cooldown_seconds: i64) -> Self {
        Self {
            store,
            failure_threshold: failure_threshold.max(1),
            cooldown: Duration::seconds(cooldown_seconds.clamp(0, MAX_COOLDOWN_SECS)),
        }
    }

    pub fn in_memory(failure_threshold: u32, cooldown_seconds: i64) -> Self {
        Self::new(Arc::new(InMemoryBreakerStore::new()), failure_threshold, cooldown_seconds)
    }

    /// False while the provider's breaker is open.
    pub async fn allow(&self, provider: &str) -> bool {
        self.allow_at(provider, Utc::now()).await
    }

    pub async fn allow_at(&self, provider: &str, now: DateTime<Utc>) -> bool {
        match self.store.load(provider).await.open_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    pub async fn record_success(&self, provider: &str) {
        self.store.save(provider, BreakerState::default()).await;
    }

    pub async fn record_failure(&self, provider: &str) {
        self.record_failure_at(provider, Utc::now()).await;
    }

    pub async fn record_failure_at(&self, provider: &str, now: DateTime<Utc>) {
        let mut state = self.store.load(provider).await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(now + self.cooldown);
            tracing::warn!(
                provider,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.num_seconds(),
                "Circuit breaker opened"
            );
        }
        self.store.save(provider, state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::in_memory(3, 300);
        let now = Utc::now();
        for _ in 0..2 {
            breaker.record_failure_at("gemini", now).await;
        }
        assert!(breaker.allow_at("gemini", now).await);

        breaker.record_failure_at("gemini", now).await;
        assert!(!breaker.allow_at("gemini", now).await);
        assert!(breaker.allow_at("openai", now).await, "other providers unaffected");
    }

    #[tokio::test]
    async fn test_closes_after_cooldown() {
        let breaker = CircuitBreaker::in_memory(1, 60);
        let now = Utc::now();
        breaker.record_failure_at("openai", now).await;
        assert!(!breaker.allow_at("openai", now + Duration::seconds(30)).await);
        assert!(breaker.allow_at("openai", now + Duration::seconds(61)).await);
    }

    #[tokio::test]
    async fn test_success_resets() {
        let breaker = CircuitBreaker::in_memory(2, 60);
        let now = Utc::now();
        breaker.record_failure_at("openai", now).await;
        breaker.record_success("openai").await;
        breaker.record_failure_at("openai", now).await;
        assert!(breaker.allow_at("openai", now).await);
    }

    #[tokio::test]
    async fn test_shared_store_between_breakers() {
        let store: Arc<dyn BreakerStore> = Arc::new(InMemoryBreakerStore::new());
        let a = CircuitBreaker::new(store.clone(), 1, 60);
        let b = CircuitBreaker::new(store, 1, 60);
        a.record_failure("openai").await;
        assert!(!b.allow("openai").await);
    }

    #[tokio::test]
    async fn test_huge_cooldown_is_clamped() {
        let breaker = CircuitBreaker::in_memory(1, i64::MAX);
        let now = Utc::now();
        breaker.record_failure_at("openai", now).await;
        assert!(!breaker.allow_at("openai", now + Duration::days(6)).await);
        assert!(breaker.allow_at("openai", now + Duration::seconds(MAX_COOLDOWN_SECS)).await);
    }
}
