//! The intelligence engine facade
//!
//! [`IntelEngine`] is cheap to clone; every clone shares one
//! [`EngineContext`], so concurrent callers and background tasks see the
//! same cache, quotas and breakers.

use crate::aggregator::Aggregator;
use crate::cache::CacheStore;
use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::config::EngineConfig;
use crate::context::{EngineContext, HealthProbe, LastError};
use crate::dispatch::DispatchCoordinator;
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::registry::{load_heuristics, providers_from_config, ProviderOptions, RegisteredProvider};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use threatlens_core::{AggregatedVerdict, Error, Fingerprint, Result};
use threatlens_providers::{LocalHeuristics, SharedProvider};
use threatlens_telemetry::metrics::{
    ASSESSMENTS_TOTAL, ASSESSMENT_LATENCY_US, CANCELLATIONS_TOTAL, HEURISTIC_FALLBACKS_TOTAL,
};
use threatlens_telemetry::MetricsSnapshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operational view of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub enabled: bool,
    pub configured: bool,
    pub priority: Option<u32>,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
    /// Time before an open breaker admits a trial
    pub retry_in: Option<Duration>,
    pub rate: Option<RateLimitStatus>,
    pub last_error: Option<LastError>,
    pub last_health_check: Option<HealthProbe>,
}

/// Scope of a cache invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheInvalidation {
    /// Every provider's verdict for one fingerprint
    Fingerprint(Fingerprint),
    /// The whole cache
    All,
}

/// Handles for the background sweeper and health poller
pub struct BackgroundTasks {
    sweeper: JoinHandle<()>,
    health_poller: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for both tasks to stop after their shutdown token fires
    pub async fn join(self) {
        for (name, handle) in [("cache sweeper", self.sweeper), ("health poller", self.health_poller)] {
            if let Err(e) = handle.await {
                warn!("Background {} ended abnormally: {}", name, e);
            }
        }
    }

    /// Abort both tasks without waiting
    pub fn abort(&self) {
        self.sweeper.abort();
        self.health_poller.abort();
    }
}

struct EngineInner {
    providers: Vec<RegisteredProvider>,
    context: Arc<EngineContext>,
    dispatcher: DispatchCoordinator,
    aggregator: Aggregator,
    sweep_interval: Duration,
    health_check_interval: Duration,
}

/// Threat-intelligence aggregation engine
#[derive(Clone)]
pub struct IntelEngine {
    inner: Arc<EngineInner>,
}

impl IntelEngine {
    /// Start building an engine by hand
    pub fn builder() -> IntelEngineBuilder {
        IntelEngineBuilder::new()
    }

    /// Build an engine with the built-in adapters named in configuration
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = IntelEngineBuilder::new()
            .max_concurrent_calls(config.max_concurrent_calls)
            .call_timeout(config.call_timeout())
            .cache_max_entries(config.cache.max_entries)
            .sweep_interval(config.cache.sweep_interval())
            .health_check_interval(config.health_check_interval());

        for (adapter, options) in providers_from_config(config) {
            builder = builder.add_provider(adapter, options);
        }
        if let Some(heuristics) = load_heuristics(&config.heuristics)? {
            builder = builder.with_shared_heuristics(heuristics);
        }

        builder.build()
    }

    /// Assess one fingerprint
    ///
    /// Provider failures never surface here: they are recorded as outcome
    /// markers on the verdict. Only cancellation and the absence of any
    /// verdict source are errors.
    pub async fn assess(
        &self,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
    ) -> Result<AggregatedVerdict> {
        let inner = &self.inner;
        let metrics = inner.context.metrics();
        let started = Instant::now();

        let results = match inner
            .dispatcher
            .collect(fingerprint, &inner.providers, cancel)
            .await
        {
            Ok(results) => results,
            Err(Error::Cancelled) => {
                info!("Assessment of {} cancelled", fingerprint.short());
                metrics.record_cancellation();
                metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
                return Err(Error::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let verdict = inner.aggregator.aggregate(fingerprint, results)?;

        let latency_us = started.elapsed().as_micros() as u64;
        metrics.record_assessment(latency_us);
        metrics::histogram!(ASSESSMENT_LATENCY_US).record(latency_us as f64);

        let result = if verdict.heuristic_only {
            metrics.record_heuristic_fallback();
            metrics::counter!(HEURISTIC_FALLBACKS_TOTAL).increment(1);
            "heuristic"
        } else if verdict.is_threat {
            "threat"
        } else {
            "clean"
        };
        metrics::counter!(ASSESSMENTS_TOTAL, "result" => result).increment(1);

        info!(
            assessment_id = %verdict.assessment_id,
            fingerprint = %verdict.fingerprint.short(),
            result,
            source = %verdict.source,
            risk = %verdict.risk_level,
            confidence = verdict.confidence,
            latency_us,
            "Assessment complete"
        );
        if verdict.heuristic_only {
            warn!(
                "No provider answered for {}: {} providers missing",
                fingerprint.short(),
                verdict.missing_sources().len()
            );
        }

        Ok(verdict)
    }

    /// Per-provider breaker, quota and error view, in priority order
    pub fn health_status(&self) -> Vec<ProviderHealth> {
        let ctx = &self.inner.context;
        self.inner
            .providers
            .iter()
            .map(|provider| {
                let id = provider.id.as_str();
                let breaker = ctx.breaker(id).map(CircuitBreaker::snapshot);
                ProviderHealth {
                    provider: provider.id.clone(),
                    enabled: provider.enabled,
                    configured: provider.adapter.is_configured(),
                    priority: provider.priority,
                    breaker: breaker.map_or(BreakerState::Closed, |b| b.state),
                    consecutive_failures: breaker.map_or(0, |b| b.consecutive_failures),
                    retry_in: breaker.and_then(|b| b.retry_in),
                    rate: ctx.rate_limiter().status(id),
                    last_error: ctx.last_error(id),
                    last_health_check: ctx.last_health_check(id),
                }
            })
            .collect()
    }

    /// Drop cached verdicts, returning how many were removed
    pub fn invalidate_cache(&self, scope: CacheInvalidation) -> usize {
        let cache = self.inner.context.cache();
        let removed = match &scope {
            CacheInvalidation::Fingerprint(fingerprint) => cache.invalidate(fingerprint),
            CacheInvalidation::All => cache.clear(),
        };
        info!("Cache invalidation ({:?}) removed {} entries", scope, removed);
        removed
    }

    /// Probe every enabled provider once, concurrently
    ///
    /// Health probes are informational: they never touch breakers or quotas.
    pub async fn poll_health(&self) -> Vec<(String, bool)> {
        let ctx = &self.inner.context;
        let timeout = ctx.call_timeout();

        let probes = self
            .inner
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|provider| async move {
                let healthy = tokio::time::timeout(timeout, provider.adapter.health_check())
                    .await
                    .unwrap_or(false);
                ctx.record_health(&provider.id, healthy);
                if !healthy {
                    warn!("Health check failed for {}", provider.id);
                }
                (provider.id.clone(), healthy)
            });

        join_all(probes).await
    }

    /// Start the cache sweeper and the health poller
    ///
    /// Both run until `shutdown` is cancelled.
    pub fn spawn_background_tasks(&self, shutdown: CancellationToken) -> BackgroundTasks {
        let sweeper = {
            let engine = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.inner.sweep_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let removed = engine.inner.context.cache().sweep_expired();
                            if removed > 0 {
                                debug!("Cache sweep removed {} expired entries", removed);
                            }
                        }
                    }
                }
                debug!("Cache sweeper stopped");
            })
        };

        let health_poller = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.inner.health_check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let probes = engine.poll_health().await;
                            let healthy = probes.iter().filter(|(_, ok)| *ok).count();
                            debug!("Health poll: {}/{} providers healthy", healthy, probes.len());
                        }
                    }
                }
                debug!("Health poller stopped");
            })
        };

        info!(
            "Background tasks started (sweep every {:?}, health every {:?})",
            self.inner.sweep_interval, self.inner.health_check_interval
        );
        BackgroundTasks {
            sweeper,
            health_poller,
        }
    }

    /// Snapshot of in-process counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.context.metrics().snapshot()
    }

    /// Number of cached verdicts
    pub fn cache_len(&self) -> usize {
        self.inner.context.cache().len()
    }

    /// Registered provider identifiers in priority order
    pub fn provider_ids(&self) -> Vec<&str> {
        self.inner.providers.iter().map(|p| p.id.as_str()).collect()
    }

    /// Whether a heuristic fallback is installed
    pub fn has_heuristics(&self) -> bool {
        self.inner.aggregator.has_heuristics()
    }
}

/// Builder for [`IntelEngine`]
pub struct IntelEngineBuilder {
    providers: Vec<(SharedProvider, ProviderOptions)>,
    heuristics: Option<Arc<dyn LocalHeuristics>>,
    max_concurrent_calls: usize,
    call_timeout: Duration,
    cache_max_entries: Option<usize>,
    sweep_interval: Duration,
    health_check_interval: Duration,
}

impl Default for IntelEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IntelEngineBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            heuristics: None,
            max_concurrent_calls: 8,
            call_timeout: Duration::from_secs(10),
            cache_max_entries: None,
            sweep_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(300),
        }
    }

    /// Register a provider under its adapter name
    pub fn add_provider(mut self, provider: SharedProvider, options: ProviderOptions) -> Self {
        self.providers.push((provider, options));
        self
    }

    pub fn with_heuristics(self, heuristics: impl LocalHeuristics + 'static) -> Self {
        self.with_shared_heuristics(Arc::new(heuristics))
    }

    pub fn with_shared_heuristics(mut self, heuristics: Arc<dyn LocalHeuristics>) -> Self {
        self.heuristics = Some(heuristics);
        self
    }

    pub fn max_concurrent_calls(mut self, slots: usize) -> Self {
        self.max_concurrent_calls = slots;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn cache_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Validate and assemble the engine
    pub fn build(self) -> Result<IntelEngine> {
        if self.providers.is_empty() && self.heuristics.is_none() {
            return Err(Error::config(
                "no providers registered and no local heuristic installed",
            ));
        }
        if self.max_concurrent_calls == 0 {
            return Err(Error::config("max_concurrent_calls must be at least 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::config("call_timeout must be greater than zero"));
        }
        if self.sweep_interval.is_zero() || self.health_check_interval.is_zero() {
            return Err(Error::config("background intervals must be greater than zero"));
        }

        let mut seen = HashSet::new();
        let mut limiter = RateLimiter::new();
        let mut breakers = HashMap::new();
        let mut providers = Vec::with_capacity(self.providers.len());

        for (adapter, options) in self.providers {
            let id = adapter.name().to_string();
            if !seen.insert(id.clone()) {
                return Err(Error::config(format!("duplicate provider id '{}'", id)));
            }
            if options.breaker.failure_threshold == 0 {
                return Err(Error::config(format!(
                    "provider '{}': failure threshold must be at least 1",
                    id
                )));
            }

            limiter.register(id.clone(), options.rate_limit);
            breakers.insert(id.clone(), CircuitBreaker::new(id.clone(), options.breaker));
            providers.push(RegisteredProvider {
                id,
                adapter,
                enabled: options.enabled,
                priority: options.priority,
                cache_ttl: options.cache_ttl,
            });
        }
        providers.sort_by_key(RegisteredProvider::rank);

        let cache = match self.cache_max_entries {
            Some(max) => CacheStore::with_capacity_limit(max),
            None => CacheStore::new(),
        };
        let context = Arc::new(EngineContext::new(
            cache,
            limiter,
            breakers,
            self.max_concurrent_calls,
            self.call_timeout,
        ));

        info!(
            "Intel engine ready: {} providers ({} enabled), heuristics {}",
            providers.len(),
            providers.iter().filter(|p| p.enabled).count(),
            if self.heuristics.is_some() { "installed" } else { "absent" }
        );

        Ok(IntelEngine {
            inner: Arc::new(EngineInner {
                providers,
                dispatcher: DispatchCoordinator::new(Arc::clone(&context)),
                context,
                aggregator: Aggregator::new(self.heuristics),
                sweep_interval: self.sweep_interval,
                health_check_interval: self.health_check_interval,
            }),
        })
    }
}
