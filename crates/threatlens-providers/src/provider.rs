//! Provider trait and common types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderError, ProviderVerdict};

/// Trait for all threat-intelligence providers
///
/// Implementations own their wire protocol, authentication and response
/// parsing, and must normalize every answer into a [`ProviderVerdict`]. The
/// normalization rule is fixed per adapter and documented on the adapter.
#[async_trait]
pub trait ThreatProvider: Send + Sync {
    /// Look up one fingerprint
    async fn query(
        &self,
        fingerprint: &Fingerprint,
        timeout: Duration,
    ) -> Result<ProviderVerdict, ProviderError>;

    /// Check whether the provider is reachable
    async fn health_check(&self) -> bool;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Whether the provider has everything it needs to make a call
    fn is_configured(&self) -> bool {
        true
    }
}

/// Shared handle to a provider
pub type SharedProvider = Arc<dyn ThreatProvider>;

/// The built-in provider variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Multi-engine scanner aggregate (VirusTotal API v3)
    MultiEngine,
    /// Public malware sample database (MalwareBazaar)
    SampleDatabase,
    /// Community threat feed (AlienVault OTX)
    CommunityFeed,
}

impl ProviderKind {
    /// Default API endpoint for this kind
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::MultiEngine => "https://www.virustotal.com/api/v3",
            Self::SampleDatabase => "https://mb-api.abuse.ch/api/v1",
            Self::CommunityFeed => "https://otx.alienvault.com/api/v1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MultiEngine => "multi_engine",
            Self::SampleDatabase => "sample_database",
            Self::CommunityFeed => "community_feed",
        };
        f.write_str(label)
    }
}

/// Settings shared by the built-in HTTP adapters
#[derive(Clone, Default)]
pub struct AdapterSettings {
    /// Endpoint override; the kind's default endpoint when `None`
    pub endpoint: Option<String>,

    /// API credential
    pub api_key: Option<String>,

    /// Permit plain HTTP and loopback endpoints (development only)
    pub allow_insecure_endpoint: bool,
}

impl fmt::Debug for AdapterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("allow_insecure_endpoint", &self.allow_insecure_endpoint)
            .finish()
    }
}
