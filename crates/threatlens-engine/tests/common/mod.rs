//! Mock providers for engine tests
//!
//! Provides a configurable implementation of the ThreatProvider trait for
//! exercising dispatch, breakers, quotas, caching and aggregation without a
//! network.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderError, ProviderVerdict, RiskLevel};
use threatlens_engine::{IntelEngine, IntelEngineBuilder, ProviderOptions};
use threatlens_providers::{SharedProvider, StaticHeuristics, ThreatProvider};

/// What a mock does when queried
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this verdict
    Answer(ProviderVerdict),
    /// Fail with `Unavailable`
    Fail,
    /// Never return
    Hang,
}

/// Tracks how many calls are in flight across a set of mocks
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A configurable mock provider
pub struct MockProvider {
    name: String,
    behavior: Mutex<MockBehavior>,
    latency: Option<Duration>,
    configured: bool,
    healthy: AtomicBool,
    calls: AtomicU32,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl MockProvider {
    /// A mock answering "not a threat" with confidence 0.8
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: Mutex::new(MockBehavior::Answer(ProviderVerdict::clean(name, 0.8))),
            latency: None,
            configured: true,
            healthy: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            probe: None,
        }
    }

    /// Answer with a positive verdict
    pub fn threat(name: &str, risk: RiskLevel, confidence: f32, threat_name: &str) -> Self {
        Self::new(name).with_behavior(MockBehavior::Answer(
            ProviderVerdict::threat(name, risk, confidence).with_threat_name(threat_name),
        ))
    }

    /// Answer with a negative verdict
    pub fn clean(name: &str, confidence: f32) -> Self {
        Self::new(name).with_behavior(MockBehavior::Answer(ProviderVerdict::clean(name, confidence)))
    }

    /// Always fail
    pub fn failing(name: &str) -> Self {
        Self::new(name).with_behavior(MockBehavior::Fail)
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Set simulated latency for every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report missing credentials
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Change behavior between assessments
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Get the number of times query was called
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThreatProvider for MockProvider {
    async fn query(
        &self,
        _fingerprint: &Fingerprint,
        _timeout: Duration,
    ) -> Result<ProviderVerdict, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().clone();

        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }

        match behavior {
            MockBehavior::Answer(verdict) => Ok(verdict),
            MockBehavior::Fail => Err(ProviderError::unavailable("simulated provider failure")),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

/// A fingerprint derived from one hex character
pub fn fingerprint(seed: char) -> Fingerprint {
    Fingerprint::new(seed.to_string().repeat(64), seed.to_string().repeat(32))
        .expect("seed must be a hex digit")
}

/// Heuristics with an empty blocklist
pub fn heuristics() -> StaticHeuristics {
    StaticHeuristics::new(Vec::<String>::new())
}

/// Builder pre-loaded with the given mocks
pub fn builder(providers: &[(&Arc<MockProvider>, ProviderOptions)]) -> IntelEngineBuilder {
    providers
        .iter()
        .fold(IntelEngine::builder(), |builder, (mock, options)| {
            let shared: SharedProvider = Arc::clone(mock) as SharedProvider;
            builder.add_provider(shared, *options)
        })
}

/// Engine over the given mocks with the empty-blocklist heuristic installed
pub fn engine(providers: &[(&Arc<MockProvider>, ProviderOptions)]) -> IntelEngine {
    builder(providers)
        .with_heuristics(heuristics())
        .build()
        .expect("engine should build")
}

/// Options with a priority
pub fn ranked(priority: u32) -> ProviderOptions {
    ProviderOptions::default().with_priority(priority)
}
