//! Threatlens CLI
//!
//! Assess file fingerprints against the configured threat-intelligence
//! providers, inspect provider health, and validate configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use threatlens_core::Fingerprint;
use threatlens_engine::IntelEngine;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(name = "threatlens")]
#[command(about = "Threat intelligence aggregation for file fingerprints", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "threatlens.yaml", env = "THREATLENS_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assess one fingerprint
    Assess {
        /// SHA-256 digest (hex)
        #[arg(long)]
        sha256: String,

        /// MD5 digest (hex)
        #[arg(long)]
        md5: String,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assess every `<sha256> <md5>` line of a file, printing JSON lines
    Batch {
        /// Input file
        file: PathBuf,

        /// Assessments in flight at once
        #[arg(short, long, default_value = "4")]
        parallel: usize,
    },

    /// Show breaker, quota and error state per provider
    Health {
        /// Probe every enabled provider first
        #[arg(long)]
        probe: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);
    let metrics_handle = init_metrics()?;

    let config = config::load(&cli.config)?;
    if let Command::CheckConfig = cli.command {
        print!("{}", commands::check_config(&config));
        return Ok(());
    }

    let target = assess_target(&cli.command)?;
    let engine = IntelEngine::from_config(&config).context("Failed to build engine")?;
    info!("Providers: {}", engine.provider_ids().join(", "));

    let shutdown = CancellationToken::new();
    let background = engine.spawn_background_tasks(shutdown.child_token());
    let cancel = shutdown.child_token();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, cancelling in-flight assessments...");
            shutdown.cancel();
        })
    };

    let outcome = match cli.command {
        Command::Assess { json, .. } => match &target {
            Some(fingerprint) => commands::assess(&engine, fingerprint, &cancel, json).await,
            None => Ok(()),
        },
        Command::Batch { file, parallel } => {
            commands::batch(&engine, &file, parallel, &cancel).await
        }
        Command::Health { probe, json } => commands::health(&engine, probe, json).await,
        Command::CheckConfig => Ok(()),
    };

    shutdown.cancel();
    signal_task.abort();
    background.join().await;

    let snapshot = engine.metrics();
    info!(
        "Assessments: {}, provider calls: {} ({:.0}% failed), cache hits: {}",
        snapshot.assessments,
        snapshot.provider_calls,
        snapshot.failure_rate() * 100.0,
        snapshot.cache_hits
    );
    if cli.metrics {
        eprintln!("{}", metrics_handle.render());
    }

    outcome
}

/// Fingerprint named on the command line, validated before anything runs
fn assess_target(command: &Command) -> Result<Option<Fingerprint>> {
    match command {
        Command::Assess { sha256, md5, .. } => {
            Ok(Some(Fingerprint::new(sha256.as_str(), md5.as_str())?))
        }
        _ => Ok(None),
    }
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("threatlens=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("threatlens=info"))
    };

    // Logs go to stderr so verdicts on stdout stay machine-readable
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    threatlens_telemetry::describe_metrics();
    Ok(handle)
}
