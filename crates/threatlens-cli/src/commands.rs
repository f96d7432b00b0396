//! Subcommand implementations and output rendering

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::fmt::Write as _;
use std::path::Path;
use threatlens_core::{AggregatedVerdict, Error, Fingerprint, SourceStatus};
use threatlens_engine::{EngineConfig, IntelEngine, ProviderHealth};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Assess one fingerprint and print the verdict
pub async fn assess(
    engine: &IntelEngine,
    fingerprint: &Fingerprint,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    let verdict = engine.assess(fingerprint, cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print!("{}", render_verdict(&verdict));
    }
    Ok(())
}

/// Assess every fingerprint listed in a file, `parallel` at a time
///
/// Each line holds a SHA-256 and an MD5 digest separated by whitespace;
/// blank lines and `#` comments are skipped. Results are printed as JSON
/// lines in completion order.
pub async fn batch(
    engine: &IntelEngine,
    path: &Path,
    parallel: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let fingerprints = parse_fingerprint_list(&content)?;
    info!("Assessing {} fingerprints from {}", fingerprints.len(), path.display());

    let mut results = stream::iter(fingerprints)
        .map(|fingerprint| async move {
            let verdict = engine.assess(&fingerprint, cancel).await;
            (fingerprint, verdict)
        })
        .buffer_unordered(parallel.max(1));

    let mut failures = 0usize;
    while let Some((fingerprint, verdict)) = results.next().await {
        match verdict {
            Ok(verdict) => println!("{}", serde_json::to_string(&verdict)?),
            Err(Error::Cancelled) => {
                warn!("Batch cancelled");
                return Err(Error::Cancelled.into());
            }
            Err(e) => {
                failures += 1;
                warn!("Assessment of {} failed: {}", fingerprint, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} assessments produced no verdict", failures);
    }
    Ok(())
}

/// Print provider health, optionally probing every provider first
pub async fn health(engine: &IntelEngine, probe: bool, json: bool) -> Result<()> {
    if probe {
        engine.poll_health().await;
    }
    let health = engine.health_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        print!("{}", render_health(&health));
    }
    Ok(())
}

/// Summarize a configuration that passed validation
pub fn check_config(config: &EngineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Configuration OK");
    let _ = writeln!(
        out,
        "  concurrency: {} calls, timeout {}ms",
        config.max_concurrent_calls, config.call_timeout_ms
    );
    let _ = writeln!(
        out,
        "  heuristics: {} ({} inline digests)",
        if config.heuristics.enabled { "enabled" } else { "disabled" },
        config.heuristics.blocklist.len()
    );

    for (id, provider) in &config.providers {
        let key = if provider.resolve_api_key().is_some() {
            "key present"
        } else {
            "NO KEY"
        };
        let limit = provider.effective_rate_limit();
        let _ = writeln!(
            out,
            "  {:<16} {:<16} {:<8} priority {:<4} ttl {}s  {}/min {}/day  {}",
            id,
            provider.kind.to_string(),
            if provider.enabled { "enabled" } else { "disabled" },
            provider
                .priority
                .map_or_else(|| "-".to_string(), |p| p.to_string()),
            provider.cache_ttl().as_secs(),
            limit.per_minute,
            limit.per_day,
            key
        );
    }
    out
}

/// Parse `<sha256> <md5>` lines
pub fn parse_fingerprint_list(content: &str) -> Result<Vec<Fingerprint>> {
    content
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.split('#').next().unwrap_or_default().trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(n, line)| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(sha256), Some(md5), None) => Fingerprint::new(sha256, md5)
                    .with_context(|| format!("line {}: invalid fingerprint", n)),
                _ => anyhow::bail!("line {}: expected '<sha256> <md5>'", n),
            }
        })
        .collect()
}

fn status_label(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Cached => "cached".to_string(),
        SourceStatus::Fresh => "fresh".to_string(),
        SourceStatus::Disabled => "disabled".to_string(),
        SourceStatus::Skipped(reason) => format!("skipped ({})", reason),
        SourceStatus::Failed(reason) => format!("failed ({})", reason),
    }
}

/// Human-readable verdict
pub fn render_verdict(verdict: &AggregatedVerdict) -> String {
    let mut out = String::new();
    let headline = if verdict.is_threat { "THREAT" } else { "CLEAN" };
    let _ = writeln!(out, "{}  {}", headline, verdict.fingerprint);
    let _ = writeln!(
        out,
        "  risk {}  confidence {:.2}  source {}",
        verdict.risk_level, verdict.confidence, verdict.source
    );
    if let Some(name) = &verdict.threat_name {
        let _ = writeln!(out, "  threat {}", name);
    }
    if verdict.heuristic_only {
        let _ = writeln!(out, "  heuristic only: no external confirmation");
    }
    for outcome in &verdict.outcomes {
        let _ = writeln!(out, "  {:<16} {}", outcome.provider, status_label(&outcome.status));
    }
    out
}

/// Human-readable health table
pub fn render_health(health: &[ProviderHealth]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<8} {:<10} {:>8} {:>10} {:>10}  last error",
        "provider", "enabled", "breaker", "failures", "left/min", "left/day"
    );
    for h in health {
        let breaker = serde_json::to_value(h.breaker)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let (per_minute, per_day) = h
            .rate
            .map_or((0, 0), |r| (r.remaining_per_minute, r.remaining_per_day));
        let last_error = h
            .last_error
            .as_ref()
            .map_or_else(|| "-".to_string(), |e| format!("{} at {}", e.error, e.at.to_rfc3339()));
        let _ = writeln!(
            out,
            "{:<16} {:<8} {:<10} {:>8} {:>10} {:>10}  {}",
            h.provider, h.enabled, breaker, h.consecutive_failures, per_minute, per_day, last_error
        );
    }
    out
}
