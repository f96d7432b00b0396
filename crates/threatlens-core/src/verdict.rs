//! Provider verdicts and the aggregated assessment result

use crate::error::ProviderError;
use crate::types::{Fingerprint, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source name used for verdicts produced by the local heuristic scanner
pub const LOCAL_HEURISTICS: &str = "LocalHeuristics";

/// One provider's judgment of one fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderVerdict {
    /// Provider identifier
    pub source: String,

    /// Whether the provider considers the artifact a known threat
    pub is_threat: bool,

    /// Threat or family name, if the provider reported one
    pub threat_name: Option<String>,

    /// Normalized risk level
    pub risk_level: RiskLevel,

    /// Normalized confidence (0.0-1.0)
    pub confidence: f32,

    /// Human-readable description
    pub description: String,

    /// When the provider produced this answer
    pub produced_at: DateTime<Utc>,

    /// Whether this verdict was served from the cache
    pub from_cache: bool,
}

impl ProviderVerdict {
    /// Create a positive ("known threat") verdict
    pub fn threat(source: impl Into<String>, risk_level: RiskLevel, confidence: f32) -> Self {
        Self::new(source, true, risk_level, confidence)
    }

    /// Create a negative ("not a known threat") verdict
    pub fn clean(source: impl Into<String>, confidence: f32) -> Self {
        Self::new(source, false, RiskLevel::Low, confidence)
    }

    fn new(source: impl Into<String>, is_threat: bool, risk_level: RiskLevel, confidence: f32) -> Self {
        Self {
            source: source.into(),
            is_threat,
            threat_name: None,
            risk_level,
            confidence: clamp_confidence(confidence),
            description: String::new(),
            produced_at: Utc::now(),
            from_cache: false,
        }
    }

    /// Attach a threat or family name
    pub fn with_threat_name(mut self, name: impl Into<String>) -> Self {
        self.threat_name = Some(name.into());
        self
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the production timestamp
    pub fn with_produced_at(mut self, produced_at: DateTime<Utc>) -> Self {
        self.produced_at = produced_at;
        self
    }

    /// Copy of this verdict marked as served from the cache
    pub fn as_cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// How one provider took part in an assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum SourceStatus {
    /// Answered from a non-expired cache entry
    Cached,
    /// Answered by a live call during this assessment
    Fresh,
    /// Provider is disabled in configuration
    Disabled,
    /// Not called: circuit open, quota spent, or configuration missing
    Skipped(ProviderError),
    /// Called, but the call failed or timed out
    Failed(ProviderError),
}

impl SourceStatus {
    /// Whether the provider contributed a verdict
    pub fn contributed(&self) -> bool {
        matches!(self, Self::Cached | Self::Fresh)
    }
}

/// Per-provider marker on an aggregated verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    /// Provider identifier
    pub provider: String,

    /// What happened with this provider
    #[serde(flatten)]
    pub status: SourceStatus,
}

impl SourceOutcome {
    /// Create a new outcome marker
    pub fn new(provider: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            provider: provider.into(),
            status,
        }
    }
}

/// The engine's final, merged judgment for a fingerprint
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedVerdict {
    /// Assessment identifier for log correlation
    pub assessment_id: Uuid,

    /// The assessed fingerprint
    pub fingerprint: Fingerprint,

    /// Whether the artifact is a known threat
    pub is_threat: bool,

    /// Derived risk level
    pub risk_level: RiskLevel,

    /// Derived confidence (0.0-1.0)
    pub confidence: f32,

    /// Chosen threat name
    pub threat_name: Option<String>,

    /// Deciding provider, or [`LOCAL_HEURISTICS`] for heuristic-only results
    pub source: String,

    /// Contributing verdicts in provider priority order
    pub contributors: Vec<ProviderVerdict>,

    /// Every registered provider and how it took part, in priority order
    pub outcomes: Vec<SourceOutcome>,

    /// Whether any live provider call answered during this assessment
    pub live_consulted: bool,

    /// Whether no provider answered and the local heuristic decided
    pub heuristic_only: bool,

    /// When the assessment completed
    pub assessed_at: DateTime<Utc>,
}

impl AggregatedVerdict {
    /// Providers that contributed a verdict
    pub fn contributing_sources(&self) -> Vec<&str> {
        self.contributors.iter().map(|v| v.source.as_str()).collect()
    }

    /// Providers that were skipped or failed
    pub fn missing_sources(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.status.contributed())
            .map(|o| o.provider.as_str())
            .collect()
    }

    /// Outcome marker for one provider
    pub fn outcome(&self, provider: &str) -> Option<&SourceStatus> {
        self.outcomes
            .iter()
            .find(|o| o.provider == provider)
            .map(|o| &o.status)
    }
}
