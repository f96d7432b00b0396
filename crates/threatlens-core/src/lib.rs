//! Threatlens Core
//!
//! Core types shared across Threatlens components.
//!
//! This crate provides:
//! - Dual-digest fingerprints used as lookup keys
//! - Normalized risk levels and provider verdicts
//! - The aggregated verdict returned by the engine
//! - Error types and result handling

pub mod error;
pub mod types;
pub mod verdict;

pub use error::{Error, ProviderError, Result};
pub use types::{Fingerprint, RiskLevel};
pub use verdict::{
    AggregatedVerdict, ProviderVerdict, SourceOutcome, SourceStatus, LOCAL_HEURISTICS,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ProviderError, Result};
    pub use crate::types::{Fingerprint, RiskLevel};
    pub use crate::verdict::{AggregatedVerdict, ProviderVerdict, SourceOutcome, SourceStatus};
}
