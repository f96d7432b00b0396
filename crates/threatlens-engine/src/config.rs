//! Engine configuration
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid (if provider-less) configuration.

use crate::circuit_breaker::BreakerConfig;
use crate::rate_limiter::RateLimit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use threatlens_core::{Error, Result};
use threatlens_providers::{AdapterSettings, ProviderKind};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global ceiling on in-flight provider calls, shared by all queries
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Interval between background health polls
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Local heuristic fallback
    #[serde(default)]
    pub heuristics: HeuristicsConfig,

    /// Permit plain HTTP and loopback provider endpoints (development only)
    #[serde(default)]
    pub allow_insecure_endpoints: bool,

    /// Providers by identifier
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            call_timeout_ms: default_call_timeout_ms(),
            cache: CacheConfig::default(),
            health_check_interval_secs: default_health_check_interval_secs(),
            heuristics: HeuristicsConfig::default(),
            allow_insecure_endpoints: false,
            providers: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_calls == 0 {
            return Err(Error::config("max_concurrent_calls must be at least 1"));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::config("call_timeout_ms must be greater than zero"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(Error::config("cache.sweep_interval_secs must be greater than zero"));
        }
        if self.health_check_interval_secs == 0 {
            return Err(Error::config("health_check_interval_secs must be greater than zero"));
        }
        if self.cache.max_entries == Some(0) {
            return Err(Error::config("cache.max_entries must be at least 1 when set"));
        }

        for (id, provider) in &self.providers {
            if id.trim().is_empty() {
                return Err(Error::config("provider identifiers must not be empty"));
            }
            if provider.circuit_breaker.failure_threshold == 0 {
                return Err(Error::config(format!(
                    "provider '{}': circuit_breaker.failure_threshold must be at least 1",
                    id
                )));
            }
            if provider.circuit_breaker.cooldown_secs == 0 {
                return Err(Error::config(format!(
                    "provider '{}': circuit_breaker.cooldown_secs must be greater than zero",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Per-call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Interval between background health polls
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Identifiers of enabled providers
    pub fn enabled_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on cached verdicts; unbounded when absent
    #[serde(default = "default_max_entries")]
    pub max_entries: Option<usize>,

    /// Interval between background sweeps of expired entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Interval between background sweeps
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Local heuristic fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicsConfig {
    /// Install the heuristic fallback
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Known-bad SHA-256 or MD5 digests
    #[serde(default)]
    pub blocklist: Vec<String>,

    /// File with one digest per line; `#` starts a comment
    #[serde(default)]
    pub blocklist_file: Option<PathBuf>,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocklist: Vec::new(),
            blocklist_file: None,
        }
    }
}

/// One provider's configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Built-in adapter to use
    pub kind: ProviderKind,

    /// Whether the provider is consulted at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Inline API key
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Endpoint override
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Rank for aggregation; lower wins, absent ranks last
    #[serde(default)]
    pub priority: Option<u32>,

    /// Cache lifetime for this provider's verdicts
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Request ceilings; omitted windows keep the kind's quota
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,

    /// Circuit breaker tuning
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
}

impl ProviderConfig {
    /// Minimal enabled configuration for a kind
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            enabled: true,
            api_key: None,
            api_key_env: None,
            endpoint: None,
            priority: None,
            cache_ttl_secs: None,
            rate_limit: None,
            circuit_breaker: BreakerSettings::default(),
        }
    }

    /// Inline key if set, otherwise the named environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        let inline = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        if let Some(key) = inline {
            return Some(key.to_string());
        }

        let var = self.api_key_env.as_deref()?;
        std::env::var(var)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Cache lifetime, falling back to the kind's default
    ///
    /// Comprehensive scanners change slowly; community feeds move fast.
    pub fn cache_ttl(&self) -> Duration {
        let secs = self.cache_ttl_secs.unwrap_or(match self.kind {
            ProviderKind::MultiEngine => 24 * 60 * 60,
            ProviderKind::SampleDatabase => 12 * 60 * 60,
            ProviderKind::CommunityFeed => 60 * 60,
        });
        Duration::from_secs(secs)
    }

    /// Request ceilings, falling back to the kind's public-tier quota
    pub fn effective_rate_limit(&self) -> RateLimit {
        let quota = match self.kind {
            ProviderKind::MultiEngine => RateLimit::new(4, 500),
            ProviderKind::SampleDatabase => RateLimit::new(60, 10_000),
            ProviderKind::CommunityFeed => RateLimit::new(100, 10_000),
        };
        match self.rate_limit {
            Some(settings) => RateLimit::new(
                settings.per_minute.unwrap_or(quota.per_minute),
                settings.per_day.unwrap_or(quota.per_day),
            ),
            None => quota,
        }
    }

    /// Adapter settings with the key resolved
    pub fn adapter_settings(&self, allow_insecure_endpoint: bool) -> AdapterSettings {
        AdapterSettings {
            endpoint: self.endpoint.clone(),
            api_key: self.resolve_api_key(),
            allow_insecure_endpoint,
        }
    }
}

/// Request ceilings as written in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Calls allowed per minute window
    #[serde(default)]
    pub per_minute: Option<u32>,

    /// Calls allowed per day window
    #[serde(default)]
    pub per_day: Option<u32>,
}

/// Circuit breaker tuning as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open after the last failure
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(settings: BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    8
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_health_check_interval_secs() -> u64 {
    300
}

fn default_max_entries() -> Option<usize> {
    Some(10_000)
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
max_concurrent_calls: 4
call_timeout_ms: 2500
cache:
  max_entries: 500
heuristics:
  blocklist:
    - "44D88612FEA8A8F36DE82E1278ABB02F"
providers:
  virustotal:
    kind: multi_engine
    api_key: "vt-key"
    priority: 1
    rate_limit: { per_minute: 4, per_day: 500 }
  bazaar:
    kind: sample_database
    priority: 2
    cache_ttl_secs: 600
    circuit_breaker: { failure_threshold: 3 }
  otx:
    kind: community_feed
    enabled: false
"#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.max_concurrent_calls, 4);
        assert_eq!(config.call_timeout(), Duration::from_millis(2500));
        assert_eq!(config.cache.max_entries, Some(500));
        assert_eq!(config.cache.sweep_interval_secs, 300);
        assert_eq!(config.heuristics.blocklist.len(), 1);
        assert_eq!(config.enabled_providers(), vec!["bazaar", "virustotal"]);

        let bazaar = &config.providers["bazaar"];
        assert_eq!(bazaar.cache_ttl(), Duration::from_secs(600));
        assert_eq!(bazaar.circuit_breaker.failure_threshold, 3);
        assert_eq!(bazaar.circuit_breaker.cooldown_secs, 300);

        let vt = &config.providers["virustotal"];
        assert_eq!(vt.resolve_api_key().as_deref(), Some("vt-key"));
        assert_eq!(vt.cache_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.max_concurrent_calls, 8);
        assert_eq!(config.call_timeout_ms, 10_000);
        assert!(config.heuristics.enabled);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_settings() {
        let zero_slots = "max_concurrent_calls: 0";
        assert!(matches!(
            EngineConfig::from_yaml_str(zero_slots),
            Err(Error::Config(_))
        ));

        let zero_timeout = "call_timeout_ms: 0";
        assert!(EngineConfig::from_yaml_str(zero_timeout).is_err());

        let zero_threshold = r#"
providers:
  otx:
    kind: community_feed
    circuit_breaker: { failure_threshold: 0 }
"#;
        let err = EngineConfig::from_yaml_str(zero_threshold).unwrap_err();
        assert!(err.to_string().contains("otx"));
    }

    #[test]
    fn test_unknown_kind_is_yaml_error() {
        let yaml = "providers: { x: { kind: carrier_pigeon } }";
        assert!(matches!(EngineConfig::from_yaml_str(yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_api_key_from_environment() {
        std::env::set_var("THREATLENS_TEST_OTX_KEY", "  env-key  ");
        let mut otx = ProviderConfig::new(ProviderKind::CommunityFeed);
        otx.api_key_env = Some("THREATLENS_TEST_OTX_KEY".to_string());
        assert_eq!(otx.resolve_api_key().as_deref(), Some("env-key"));

        otx.api_key = Some("inline".to_string());
        assert_eq!(otx.resolve_api_key().as_deref(), Some("inline"));

        otx.api_key = Some("   ".to_string());
        otx.api_key_env = Some("THREATLENS_TEST_UNSET_KEY".to_string());
        assert!(otx.resolve_api_key().is_none());
    }

    #[test]
    fn test_kind_defaults() {
        let vt = ProviderConfig::new(ProviderKind::MultiEngine);
        assert_eq!(vt.effective_rate_limit(), RateLimit::new(4, 500));
        let otx = ProviderConfig::new(ProviderKind::CommunityFeed);
        assert_eq!(otx.cache_ttl(), Duration::from_secs(3600));

        let breaker: BreakerConfig = BreakerSettings::default().into();
        assert_eq!(breaker, BreakerConfig::default());
    }

    #[test]
    fn test_partial_rate_limit_keeps_kind_quota() {
        let yaml = r#"
providers:
  virustotal:
    kind: multi_engine
    rate_limit: { per_minute: 2 }
  bazaar:
    kind: sample_database
    rate_limit: { per_day: 50 }
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.providers["virustotal"].effective_rate_limit(),
            RateLimit::new(2, 500)
        );
        assert_eq!(
            config.providers["bazaar"].effective_rate_limit(),
            RateLimit::new(60, 50)
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.providers.len(), 3);

        let missing = EngineConfig::from_file("/nonexistent/threatlens.yaml");
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
