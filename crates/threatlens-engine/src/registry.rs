//! Provider registration from configuration

use crate::aggregator::ProviderRank;
use crate::circuit_breaker::BreakerConfig;
use crate::config::{EngineConfig, HeuristicsConfig, ProviderConfig};
use crate::rate_limiter::RateLimit;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use threatlens_core::{Error, Result};
use threatlens_providers::{build_provider, LocalHeuristics, SharedProvider, StaticHeuristics};
use tracing::{info, warn};

/// How the engine treats one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    pub enabled: bool,
    /// Aggregation rank; lower wins, `None` ranks last
    pub priority: Option<u32>,
    pub cache_ttl: Duration,
    pub rate_limit: RateLimit,
    pub breaker: BreakerConfig,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            cache_ttl: Duration::from_secs(60 * 60),
            rate_limit: RateLimit::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl ProviderOptions {
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<&ProviderConfig> for ProviderOptions {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            enabled: config.enabled,
            priority: config.priority,
            cache_ttl: config.cache_ttl(),
            rate_limit: config.effective_rate_limit(),
            breaker: config.circuit_breaker.into(),
        }
    }
}

/// A provider as the dispatcher sees it
#[derive(Clone)]
pub struct RegisteredProvider {
    pub id: String,
    pub adapter: SharedProvider,
    pub enabled: bool,
    pub priority: Option<u32>,
    pub cache_ttl: Duration,
}

impl RegisteredProvider {
    pub fn rank(&self) -> ProviderRank {
        ProviderRank::new(self.id.clone(), self.priority)
    }
}

/// Instantiate the built-in adapters named in configuration
///
/// An adapter that cannot be built (for example, an endpoint that fails
/// validation) is logged and left out; the rest still register.
pub fn providers_from_config(config: &EngineConfig) -> Vec<(SharedProvider, ProviderOptions)> {
    info!("Registering {} configured providers", config.providers.len());

    let mut providers = Vec::with_capacity(config.providers.len());
    for (id, provider_config) in &config.providers {
        let settings = provider_config.adapter_settings(config.allow_insecure_endpoints);
        let has_key = settings.api_key.is_some();

        match build_provider(provider_config.kind, id.clone(), &settings) {
            Ok(adapter) => {
                info!("✓ Registered provider: {} ({})", id, provider_config.kind);
                if provider_config.enabled && !has_key {
                    warn!("Provider {} is enabled but has no API key; it will be skipped", id);
                }
                providers.push((adapter, ProviderOptions::from(provider_config)));
            }
            Err(e) => {
                warn!("✗ Failed to register provider {}: {}", id, e);
            }
        }
    }

    info!(
        "Provider registry initialized with {}/{} providers",
        providers.len(),
        config.providers.len()
    );
    providers
}

/// Build the heuristic fallback, or `None` when disabled
pub fn load_heuristics(config: &HeuristicsConfig) -> Result<Option<Arc<dyn LocalHeuristics>>> {
    if !config.enabled {
        info!("Local heuristics disabled");
        return Ok(None);
    }

    let mut digests = config.blocklist.clone();
    if let Some(path) = &config.blocklist_file {
        digests.extend(read_blocklist(path)?);
    }

    let heuristics = StaticHeuristics::new(digests);
    info!("Local heuristics loaded with {} blocklisted digests", heuristics.len());
    Ok(Some(Arc::new(heuristics)))
}

fn read_blocklist(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read blocklist {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
