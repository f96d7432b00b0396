//! Local heuristic fallback
//!
//! The heuristic scanner is always available: it is never rate limited or
//! circuit broken, and the engine only consults it when no provider answered.

use std::collections::HashSet;
use threatlens_core::{Fingerprint, ProviderVerdict, RiskLevel, LOCAL_HEURISTICS};

const BLOCKLIST_CONFIDENCE: f32 = 0.7;
const NO_INDICATOR_CONFIDENCE: f32 = 0.3;

/// Local fallback evaluator
pub trait LocalHeuristics: Send + Sync {
    /// Evaluate a fingerprint; the verdict's source is [`LOCAL_HEURISTICS`]
    fn evaluate(&self, fingerprint: &Fingerprint) -> ProviderVerdict;
}

/// Heuristics backed by a local list of known-bad digests
#[derive(Debug, Clone, Default)]
pub struct StaticHeuristics {
    blocklist: HashSet<String>,
}

impl StaticHeuristics {
    /// Create heuristics from SHA-256 or MD5 hex digests
    pub fn new<I, S>(digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocklist: digests
                .into_iter()
                .map(|d| d.as_ref().trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Number of blocklisted digests
    pub fn len(&self) -> usize {
        self.blocklist.len()
    }

    /// Whether the blocklist is empty
    pub fn is_empty(&self) -> bool {
        self.blocklist.is_empty()
    }
}

impl LocalHeuristics for StaticHeuristics {
    fn evaluate(&self, fingerprint: &Fingerprint) -> ProviderVerdict {
        let listed = self.blocklist.contains(fingerprint.sha256())
            || self.blocklist.contains(fingerprint.md5());

        if listed {
            ProviderVerdict::threat(LOCAL_HEURISTICS, RiskLevel::High, BLOCKLIST_CONFIDENCE)
                .with_threat_name("Blocklisted")
                .with_description("digest matches the local blocklist")
        } else {
            ProviderVerdict::clean(LOCAL_HEURISTICS, NO_INDICATOR_CONFIDENCE)
                .with_description("no local indicators; no external confirmation")
        }
    }
}
