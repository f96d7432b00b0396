//! CLI configuration loading
//!
//! The YAML file is optional. Environment variables prefixed with
//! `THREATLENS__` override it, with `__` separating nested keys:
//! `THREATLENS__PROVIDERS__VIRUSTOTAL__API_KEY=...`. Keys are
//! case-insensitive, so provider identifiers end up lower-cased.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::path::Path;
use threatlens_engine::EngineConfig;
use tracing::{info, warn};

const ENV_PREFIX: &str = "THREATLENS";
const ENV_SEPARATOR: &str = "__";

/// Load engine configuration from `path` and the environment
pub fn load(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        info!("Loading configuration from {}", path.display());
    } else {
        warn!(
            "Configuration file {} not found, using defaults and environment",
            path.display()
        );
    }

    let settings = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let config: EngineConfig = settings
        .try_deserialize()
        .context("Configuration does not match the expected schema")?;
    config.validate()?;

    Ok(config)
}
