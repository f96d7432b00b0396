//! Shared engine state
//!
//! Everything that outlives a single query lives here: the cache, quotas,
//! breakers, the global call slots and the per-provider status board. The
//! context is created with the engine and dropped with it.

use crate::cache::CacheStore;
use crate::circuit_breaker::CircuitBreaker;
use crate::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use threatlens_core::ProviderError;
use threatlens_telemetry::EngineMetrics;
use tokio::sync::Semaphore;

/// Most recent failure of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub error: ProviderError,
    pub at: DateTime<Utc>,
}

/// Most recent health probe of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthProbe {
    pub healthy: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
struct StatusEntry {
    last_error: Option<LastError>,
    last_health_check: Option<HealthProbe>,
}

/// Per-engine shared state handed to the dispatcher
pub struct EngineContext {
    cache: CacheStore,
    limiter: RateLimiter,
    breakers: HashMap<String, CircuitBreaker>,
    slots: Semaphore,
    call_timeout: Duration,
    metrics: EngineMetrics,
    status: RwLock<HashMap<String, StatusEntry>>,
}

impl EngineContext {
    /// Assemble a context; breakers and quotas must already be registered
    pub fn new(
        cache: CacheStore,
        limiter: RateLimiter,
        breakers: HashMap<String, CircuitBreaker>,
        max_concurrent_calls: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            limiter,
            breakers,
            slots: Semaphore::new(max_concurrent_calls.max(1)),
            call_timeout,
            metrics: EngineMetrics::new(),
            status: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self, provider: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(provider)
    }

    /// Global outbound call slots shared by every provider and query
    pub fn slots(&self) -> &Semaphore {
        &self.slots
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Remember a provider's latest failure
    pub fn record_error(&self, provider: &str, error: &ProviderError) {
        self.status
            .write()
            .entry(provider.to_string())
            .or_default()
            .last_error = Some(LastError {
            error: error.clone(),
            at: Utc::now(),
        });
    }

    /// Remember a provider's latest health probe
    pub fn record_health(&self, provider: &str, healthy: bool) {
        self.status
            .write()
            .entry(provider.to_string())
            .or_default()
            .last_health_check = Some(HealthProbe {
            healthy,
            at: Utc::now(),
        });
    }

    pub fn last_error(&self, provider: &str) -> Option<LastError> {
        self.status.read().get(provider)?.last_error.clone()
    }

    pub fn last_health_check(&self, provider: &str) -> Option<HealthProbe> {
        self.status.read().get(provider)?.last_health_check
    }
}
