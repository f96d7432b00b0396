//! Deterministic verdict aggregation
//!
//! The merge depends only on provider rank, never on the order in which
//! responses arrived:
//! - any positive: the highest-ranked positive supplies name, risk and
//!   source; confidence is the maximum across the positives that agree
//!   with it (same risk level), so agreement reinforces and never averages
//!   down
//! - otherwise, any negative: not a threat, risk Low, confidence of the
//!   highest-ranked negative
//! - otherwise: the local heuristic decides, or there is no verdict at all

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use threatlens_core::{
    AggregatedVerdict, Error, Fingerprint, ProviderVerdict, Result, RiskLevel, SourceOutcome,
    SourceStatus, LOCAL_HEURISTICS,
};
use threatlens_providers::LocalHeuristics;
use tracing::debug;
use uuid::Uuid;

/// Total order over providers: ranked before unranked, lower rank first,
/// then identifier ascending
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderRank {
    pub priority: Option<u32>,
    pub provider: String,
}

impl ProviderRank {
    pub fn new(provider: impl Into<String>, priority: Option<u32>) -> Self {
        Self {
            priority,
            provider: provider.into(),
        }
    }
}

impl Ord for ProviderRank {
    fn cmp(&self, other: &Self) -> Ordering {
        let key = |r: &Self| (r.priority.is_none(), r.priority.unwrap_or(0));
        key(self)
            .cmp(&key(other))
            .then_with(|| self.provider.cmp(&other.provider))
    }
}

impl PartialOrd for ProviderRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What one provider yielded during an assessment
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub rank: ProviderRank,
    pub status: SourceStatus,
    pub verdict: Option<ProviderVerdict>,
}

impl ProviderResult {
    /// Provider answered, from cache or live
    pub fn answered(rank: ProviderRank, verdict: ProviderVerdict) -> Self {
        let status = if verdict.from_cache {
            SourceStatus::Cached
        } else {
            SourceStatus::Fresh
        };
        Self {
            rank,
            status,
            verdict: Some(verdict),
        }
    }

    /// Provider yielded no verdict
    pub fn missing(rank: ProviderRank, status: SourceStatus) -> Self {
        Self {
            rank,
            status,
            verdict: None,
        }
    }
}

/// Merges provider results into one verdict
#[derive(Clone, Default)]
pub struct Aggregator {
    heuristics: Option<Arc<dyn LocalHeuristics>>,
}

impl Aggregator {
    pub fn new(heuristics: Option<Arc<dyn LocalHeuristics>>) -> Self {
        Self { heuristics }
    }

    /// Whether a heuristic fallback is installed
    pub fn has_heuristics(&self) -> bool {
        self.heuristics.is_some()
    }

    /// Merge results; fails only when nothing answered and no heuristic
    /// is installed
    pub fn aggregate(
        &self,
        fingerprint: &Fingerprint,
        mut results: Vec<ProviderResult>,
    ) -> Result<AggregatedVerdict> {
        results.sort_by(|a, b| a.rank.cmp(&b.rank));

        let live_consulted = results
            .iter()
            .any(|r| matches!(r.status, SourceStatus::Fresh));
        let outcomes: Vec<SourceOutcome> = results
            .iter()
            .map(|r| SourceOutcome::new(r.rank.provider.clone(), r.status.clone()))
            .collect();
        let contributors: Vec<ProviderVerdict> =
            results.into_iter().filter_map(|r| r.verdict).collect();

        let mut verdict = AggregatedVerdict {
            assessment_id: Uuid::new_v4(),
            fingerprint: fingerprint.clone(),
            is_threat: false,
            risk_level: RiskLevel::Low,
            confidence: 0.0,
            threat_name: None,
            source: String::new(),
            contributors: Vec::new(),
            outcomes,
            live_consulted,
            heuristic_only: false,
            assessed_at: chrono::Utc::now(),
        };

        if let Some(lead) = contributors.iter().find(|v| v.is_threat) {
            verdict.is_threat = true;
            verdict.risk_level = lead.risk_level;
            verdict.source = lead.source.clone();
            verdict.threat_name = lead.threat_name.clone();
            verdict.confidence = contributors
                .iter()
                .filter(|v| v.is_threat && v.risk_level == lead.risk_level)
                .map(|v| v.confidence)
                .fold(lead.confidence, f32::max);
        } else if let Some(lead) = contributors.first() {
            verdict.confidence = lead.confidence;
            verdict.source = lead.source.clone();
        } else {
            let Some(heuristics) = &self.heuristics else {
                return Err(Error::NoVerdictSource);
            };
            let fallback = heuristics.evaluate(fingerprint);
            debug!(
                "No provider answered for {}, local heuristics decided (threat: {})",
                fingerprint.short(),
                fallback.is_threat
            );

            verdict.is_threat = fallback.is_threat;
            verdict.risk_level = if fallback.is_threat {
                fallback.risk_level
            } else {
                RiskLevel::Low
            };
            verdict.confidence = fallback.confidence;
            verdict.threat_name = fallback.threat_name.clone().filter(|_| fallback.is_threat);
            verdict.source = LOCAL_HEURISTICS.to_string();
            verdict.heuristic_only = true;
            verdict.contributors = vec![fallback];
            return Ok(verdict);
        }

        verdict.contributors = contributors;
        Ok(verdict)
    }
}
