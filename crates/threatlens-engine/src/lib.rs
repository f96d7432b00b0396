//! Threatlens Engine
//!
//! Consults multiple rate-limited, unreliable threat-intelligence providers
//! for a file fingerprint and merges their answers into one deterministic
//! verdict.
//!
//! Components, leaves first:
//! - [`RateLimiter`]: per-provider minute and day quotas
//! - [`CircuitBreaker`]: per-provider failure isolation
//! - [`CacheStore`]: verdicts keyed by fingerprint and provider, with expiry
//! - [`DispatchCoordinator`]: which providers to call and how
//! - [`Aggregator`]: priority-ordered merge with heuristic fallback
//!
//! [`IntelEngine`] ties them together around an [`EngineContext`].
//!
//! # Example
//!
//! ```no_run
//! use threatlens_core::Fingerprint;
//! use threatlens_engine::{EngineConfig, IntelEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> threatlens_core::Result<()> {
//! let config = EngineConfig::from_file("threatlens.yaml")?;
//! let engine = IntelEngine::from_config(&config)?;
//!
//! let fingerprint = Fingerprint::new(
//!     "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f",
//!     "44d88612fea8a8f36de82e1278abb02f",
//! )?;
//! let verdict = engine.assess(&fingerprint, &CancellationToken::new()).await?;
//! println!("{} ({})", verdict.risk_level, verdict.source);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod rate_limiter;
pub mod registry;

pub use aggregator::{Aggregator, ProviderRank, ProviderResult};
pub use cache::CacheStore;
pub use circuit_breaker::{BreakerAdmission, BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{
    BreakerSettings, CacheConfig, EngineConfig, HeuristicsConfig, ProviderConfig, RateLimitSettings,
};
pub use context::{EngineContext, HealthProbe, LastError};
pub use dispatch::DispatchCoordinator;
pub use engine::{BackgroundTasks, CacheInvalidation, IntelEngine, IntelEngineBuilder, ProviderHealth};
pub use rate_limiter::{RateLimit, RateLimitStatus, RateLimiter};
pub use registry::{load_heuristics, providers_from_config, ProviderOptions, RegisteredProvider};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{CacheInvalidation, IntelEngine, ProviderHealth};
    pub use crate::rate_limiter::RateLimit;
    pub use crate::registry::ProviderOptions;
    pub use crate::circuit_breaker::{BreakerConfig, BreakerState};
    pub use threatlens_core::prelude::*;
}
