//! Threatlens Providers
//!
//! Provider adapters behind one uniform contract.
//!
//! Every adapter answers `query(fingerprint, timeout)` and `health_check()`
//! and normalizes its source's scale into the common
//! [`ProviderVerdict`](threatlens_core::ProviderVerdict) shape:
//! - `multi_engine`: multi-engine scanner aggregate (VirusTotal v3)
//! - `sample_database`: public malware sample database (MalwareBazaar)
//! - `community_feed`: community indicator feed (AlienVault OTX)
//!
//! The local heuristic fallback lives here too, behind [`LocalHeuristics`].

mod client;
pub mod community_feed;
pub mod heuristics;
pub mod multi_engine;
pub mod provider;
pub mod sample_database;
pub mod security;

pub use community_feed::CommunityFeedProvider;
pub use heuristics::{LocalHeuristics, StaticHeuristics};
pub use multi_engine::MultiEngineProvider;
pub use provider::{AdapterSettings, ProviderKind, SharedProvider, ThreatProvider};
pub use sample_database::SampleDatabaseProvider;
pub use security::{validate_endpoint, EndpointError, EndpointPolicy};

use std::sync::Arc;
use threatlens_core::Result;

/// Build one of the built-in adapters
pub fn build_provider(
    kind: ProviderKind,
    name: impl Into<String>,
    settings: &AdapterSettings,
) -> Result<SharedProvider> {
    let name = name.into();
    let provider: SharedProvider = match kind {
        ProviderKind::MultiEngine => Arc::new(MultiEngineProvider::new(name, settings)?),
        ProviderKind::SampleDatabase => Arc::new(SampleDatabaseProvider::new(name, settings)?),
        ProviderKind::CommunityFeed => Arc::new(CommunityFeedProvider::new(name, settings)?),
    };
    Ok(provider)
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::heuristics::{LocalHeuristics, StaticHeuristics};
    pub use crate::provider::{AdapterSettings, ProviderKind, SharedProvider, ThreatProvider};
}
