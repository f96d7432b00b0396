//! Metrics collection and reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter: assessments completed (label: `result` = threat | clean | heuristic)
pub const ASSESSMENTS_TOTAL: &str = "threatlens_assessments_total";
/// Counter: outbound provider calls (labels: `provider`, `outcome`)
pub const PROVIDER_CALLS_TOTAL: &str = "threatlens_provider_calls_total";
/// Counter: providers skipped before a call (labels: `provider`, `reason`)
pub const PROVIDER_SKIPS_TOTAL: &str = "threatlens_provider_skips_total";
/// Counter: cache hits (label: `provider`)
pub const CACHE_HITS_TOTAL: &str = "threatlens_cache_hits_total";
/// Counter: assessments decided by the local heuristic
pub const HEURISTIC_FALLBACKS_TOTAL: &str = "threatlens_heuristic_fallbacks_total";
/// Counter: assessments cancelled by the caller
pub const CANCELLATIONS_TOTAL: &str = "threatlens_cancellations_total";
/// Histogram: assessment latency in microseconds
pub const ASSESSMENT_LATENCY_US: &str = "threatlens_assessment_latency_us";
/// Gauge: circuit breaker state per provider (0 closed, 1 half-open, 2 open)
pub const BREAKER_STATE: &str = "threatlens_breaker_state";

/// Register descriptions for every Threatlens metric with the installed recorder
pub fn describe_metrics() {
    metrics::describe_counter!(ASSESSMENTS_TOTAL, "Total number of assessments by result");
    metrics::describe_counter!(
        PROVIDER_CALLS_TOTAL,
        "Total number of outbound provider calls by provider and outcome"
    );
    metrics::describe_counter!(
        PROVIDER_SKIPS_TOTAL,
        "Providers skipped without a call, by provider and reason"
    );
    metrics::describe_counter!(CACHE_HITS_TOTAL, "Verdicts served from cache by provider");
    metrics::describe_counter!(
        HEURISTIC_FALLBACKS_TOTAL,
        "Assessments with no provider answer that fell back to local heuristics"
    );
    metrics::describe_counter!(CANCELLATIONS_TOTAL, "Assessments cancelled by the caller");
    metrics::describe_histogram!(
        ASSESSMENT_LATENCY_US,
        metrics::Unit::Microseconds,
        "End-to-end assessment latency in microseconds"
    );
    metrics::describe_gauge!(
        BREAKER_STATE,
        "Circuit breaker state by provider (0 closed, 1 half-open, 2 open)"
    );
}

/// In-process counters for engine activity
#[derive(Clone)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    assessments: AtomicU64,
    cache_hits: AtomicU64,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
    provider_skips: AtomicU64,
    heuristic_fallbacks: AtomicU64,
    cancellations: AtomicU64,
    total_latency_us: AtomicU64,
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record a completed assessment and its latency
    pub fn record_assessment(&self, latency_us: u64) {
        self.inner.assessments.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound provider call and whether it succeeded
    pub fn record_provider_call(&self, success: bool) {
        self.inner.provider_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.provider_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a provider skipped before any call
    pub fn record_skip(&self) {
        self.inner.provider_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a heuristic-only assessment
    pub fn record_heuristic_fallback(&self) {
        self.inner
            .heuristic_fallbacks
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled assessment
    pub fn record_cancellation(&self) {
        self.inner.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            assessments: self.inner.assessments.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            provider_calls: self.inner.provider_calls.load(Ordering::Relaxed),
            provider_failures: self.inner.provider_failures.load(Ordering::Relaxed),
            provider_skips: self.inner.provider_skips.load(Ordering::Relaxed),
            heuristic_fallbacks: self.inner.heuristic_fallbacks.load(Ordering::Relaxed),
            cancellations: self.inner.cancellations.load(Ordering::Relaxed),
            total_latency_us: self.inner.total_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub assessments: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub provider_skips: u64,
    pub heuristic_fallbacks: u64,
    pub cancellations: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    /// Calculate average latency per assessment
    pub fn avg_latency_us(&self) -> u64 {
        if self.assessments == 0 {
            0
        } else {
            self.total_latency_us / self.assessments
        }
    }

    /// Fraction of outbound calls that failed
    pub fn failure_rate(&self) -> f64 {
        if self.provider_calls == 0 {
            0.0
        } else {
            self.provider_failures as f64 / self.provider_calls as f64
        }
    }

    /// Fraction of assessments decided by local heuristics
    pub fn heuristic_rate(&self) -> f64 {
        if self.assessments == 0 {
            0.0
        } else {
            self.heuristic_fallbacks as f64 / self.assessments as f64
        }
    }
}
