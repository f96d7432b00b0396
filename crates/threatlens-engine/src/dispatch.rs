//! Dispatch coordination
//!
//! Decides, per query, which providers to call and collects what each one
//! yielded. Planning happens synchronously against the shared context:
//! disabled, cached, unconfigured and circuit-open providers never reach
//! the network. The rest are called concurrently, bounded by the global
//! call slots and the per-call timeout, and awaited as a wait-for-all join
//! so one failure never cancels its siblings. Quota is charged once a call
//! holds a slot, so calls dropped while queued cost nothing.

use crate::aggregator::{ProviderRank, ProviderResult};
use crate::circuit_breaker::BreakerAdmission;
use crate::context::EngineContext;
use crate::registry::RegisteredProvider;
use futures::future::join_all;
use std::sync::Arc;
use threatlens_core::{Error, Fingerprint, ProviderError, Result, SourceStatus};
use threatlens_telemetry::metrics::{CACHE_HITS_TOTAL, PROVIDER_CALLS_TOTAL, PROVIDER_SKIPS_TOTAL};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Planning decision for one provider
enum Plan<'a> {
    /// Settled without a call
    Settled(ProviderResult),
    /// Cleared for an outbound call
    Dispatch(PlannedCall<'a>),
}

struct PlannedCall<'a> {
    provider: &'a RegisteredProvider,
    rank: ProviderRank,
    admission: Option<BreakerAdmission>,
}

/// Runs the per-query dispatch against shared engine state
#[derive(Clone)]
pub struct DispatchCoordinator {
    context: Arc<EngineContext>,
}

impl DispatchCoordinator {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Collect one result per provider, or [`Error::Cancelled`]
    ///
    /// Cancellation drops every in-flight call and hands back any
    /// half-open trial admissions; nothing partial is returned.
    pub async fn collect(
        &self,
        fingerprint: &Fingerprint,
        providers: &[RegisteredProvider],
        cancel: &CancellationToken,
    ) -> Result<Vec<ProviderResult>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut results = Vec::with_capacity(providers.len());
        let mut planned = Vec::new();

        for provider in providers {
            match self.plan(fingerprint, provider) {
                Plan::Dispatch(call) => planned.push(call),
                Plan::Settled(result) => results.push(result),
            }
        }

        if planned.is_empty() {
            debug!(
                "Nothing to dispatch for {}, {} providers settled without a call",
                fingerprint.short(),
                results.len()
            );
            return Ok(results);
        }

        let trials: Vec<(String, BreakerAdmission)> = planned
            .iter()
            .filter_map(|call| match call.admission {
                Some(admission @ BreakerAdmission::Trial(_)) => {
                    Some((call.provider.id.clone(), admission))
                }
                _ => None,
            })
            .collect();

        debug!("Dispatching {} for {} providers", fingerprint.short(), planned.len());
        let calls = planned.into_iter().map(|call| self.call(fingerprint, call));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for (provider, admission) in trials {
                    if let Some(breaker) = self.context.breaker(&provider) {
                        breaker.abandon_trial(admission);
                    }
                }
                Err(Error::Cancelled)
            }
            fresh = join_all(calls) => {
                results.extend(fresh);
                Ok(results)
            }
        }
    }

    /// Settle a provider without a call, or clear it for dispatch
    fn plan<'a>(&self, fingerprint: &Fingerprint, provider: &'a RegisteredProvider) -> Plan<'a> {
        let ctx = &self.context;
        let id = provider.id.as_str();
        let rank = provider.rank();

        if !provider.enabled {
            return Plan::Settled(ProviderResult::missing(rank, SourceStatus::Disabled));
        }

        if let Some(verdict) = ctx.cache().get(fingerprint, id) {
            debug!("{}: cache hit for {}", id, fingerprint.short());
            ctx.metrics().record_cache_hit();
            metrics::counter!(CACHE_HITS_TOTAL, "provider" => id.to_string()).increment(1);
            return Plan::Settled(ProviderResult::answered(rank, verdict));
        }

        if !provider.adapter.is_configured() {
            let reason =
                ProviderError::configuration_missing(format!("no API key configured for {}", id));
            return Plan::Settled(self.skip(rank, reason));
        }

        let admission = match ctx.breaker(id) {
            Some(breaker) => match breaker.try_acquire() {
                Some(admission) => Some(admission),
                None => return Plan::Settled(self.skip(rank, ProviderError::CircuitOpen)),
            },
            None => None,
        };

        Plan::Dispatch(PlannedCall {
            provider,
            rank,
            admission,
        })
    }

    fn skip(&self, rank: ProviderRank, reason: ProviderError) -> ProviderResult {
        debug!("{}: skipped ({})", rank.provider, reason);
        self.context.metrics().record_skip();
        metrics::counter!(
            PROVIDER_SKIPS_TOTAL,
            "provider" => rank.provider.clone(),
            "reason" => skip_label(&reason)
        )
        .increment(1);
        ProviderResult::missing(rank, SourceStatus::Skipped(reason))
    }

    /// One outbound call under a global slot and the per-call timeout
    async fn call(&self, fingerprint: &Fingerprint, call: PlannedCall<'_>) -> ProviderResult {
        let ctx = &self.context;
        let PlannedCall {
            provider,
            rank,
            admission,
        } = call;
        let id = provider.id.as_str();
        let breaker = ctx.breaker(id);

        let Ok(_permit) = ctx.slots().acquire().await else {
            if let (Some(breaker), Some(admission)) = (breaker, admission) {
                breaker.abandon_trial(admission);
            }
            let error = ProviderError::unavailable("call slots closed");
            return ProviderResult::missing(rank, SourceStatus::Failed(error));
        };

        if !ctx.rate_limiter().try_acquire(id) {
            if let (Some(breaker), Some(admission)) = (breaker, admission) {
                breaker.abandon_trial(admission);
            }
            return self.skip(rank, ProviderError::RateLimitExceeded);
        }

        let timeout = ctx.call_timeout();
        let started = Instant::now();
        let query = provider.adapter.query(fingerprint, timeout);
        let outcome = match tokio::time::timeout(timeout, query).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout),
        };
        let elapsed_ms = started.elapsed().as_millis();

        match outcome {
            Ok(mut verdict) => {
                verdict.source = provider.id.clone();
                verdict.from_cache = false;
                debug!(
                    "{}: answered in {}ms (threat: {}, confidence: {:.2})",
                    id, elapsed_ms, verdict.is_threat, verdict.confidence
                );

                ctx.cache()
                    .put(fingerprint, id, verdict.clone(), provider.cache_ttl);
                if let (Some(breaker), Some(admission)) = (breaker, admission) {
                    breaker.record_success(admission);
                }
                ctx.metrics().record_provider_call(true);
                metrics::counter!(
                    PROVIDER_CALLS_TOTAL,
                    "provider" => id.to_string(),
                    "outcome" => "success"
                )
                .increment(1);

                ProviderResult::answered(rank, verdict)
            }
            Err(error) => {
                warn!("{}: lookup failed after {}ms: {}", id, elapsed_ms, error);

                if let (Some(breaker), Some(admission)) = (breaker, admission) {
                    if error.is_call_failure() {
                        breaker.record_failure(admission);
                    } else {
                        breaker.abandon_trial(admission);
                    }
                }
                ctx.record_error(id, &error);
                ctx.metrics().record_provider_call(false);
                metrics::counter!(
                    PROVIDER_CALLS_TOTAL,
                    "provider" => id.to_string(),
                    "outcome" => failure_label(&error)
                )
                .increment(1);

                ProviderResult::missing(rank, SourceStatus::Failed(error))
            }
        }
    }
}

fn skip_label(reason: &ProviderError) -> &'static str {
    match reason {
        ProviderError::CircuitOpen => "circuit_open",
        ProviderError::RateLimitExceeded => "rate_limited",
        ProviderError::ConfigurationMissing(_) => "configuration_missing",
        ProviderError::Timeout | ProviderError::Unavailable(_) => "other",
    }
}

fn failure_label(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Timeout => "timeout",
        ProviderError::Unavailable(_) => "unavailable",
        ProviderError::RateLimitExceeded => "rate_limited",
        ProviderError::ConfigurationMissing(_) => "configuration_missing",
        ProviderError::CircuitOpen => "circuit_open",
    }
}
