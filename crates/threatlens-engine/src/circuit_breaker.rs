//! Per-provider circuit breaker
//!
//! ```text
//!   Closed --(threshold consecutive failures)--> Open
//!   Open   --(cooldown elapsed since last failure)--> HalfOpen (one trial)
//!   HalfOpen --trial ok--> Closed
//!   HalfOpen --trial failed--> Open (cooldown restarts)
//! ```
//!
//! The breaker only advises the dispatcher; it never performs or cancels a
//! call. Every transition happens under one lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use threatlens_telemetry::metrics::BREAKER_STATE;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open after the last failure
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Permission to make one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAdmission {
    /// Ordinary call through a closed breaker
    Normal,
    /// The single half-open trial, tagged with its generation
    Trial(u64),
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Time left before an open breaker admits a trial
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

/// Failure-isolation state machine for one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    /// Ask permission for one call; `None` means short-circuit
    pub fn try_acquire(&self) -> Option<BreakerAdmission> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Some(BreakerAdmission::Normal),
            BreakerState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if !cooled {
                    return None;
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                info!("Circuit for {} half-open, admitting trial call", self.provider);
                Some(self.start_trial(&mut inner))
            }
            BreakerState::HalfOpen if inner.trial_in_flight => None,
            BreakerState::HalfOpen => Some(self.start_trial(&mut inner)),
        }
    }

    /// Report a successful call
    pub fn record_success(&self, admission: BreakerAdmission) {
        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            (BreakerState::Closed, _) => inner.consecutive_failures = 0,
            (BreakerState::HalfOpen, BreakerAdmission::Trial(generation))
                if generation == inner.generation =>
            {
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Closed);
                info!("Circuit for {} closed after successful trial", self.provider);
            }
            // Late answer from a call admitted before the breaker opened
            _ => {}
        }
    }

    /// Report a failed or timed-out call
    pub fn record_failure(&self, admission: BreakerAdmission) {
        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            (BreakerState::Closed, _) => {
                inner.consecutive_failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    warn!(
                        "Circuit for {} opened after {} consecutive failures",
                        self.provider, inner.consecutive_failures
                    );
                }
            }
            (BreakerState::HalfOpen, BreakerAdmission::Trial(generation))
                if generation == inner.generation =>
            {
                inner.consecutive_failures += 1;
                inner.last_failure = Some(Instant::now());
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Open);
                warn!("Circuit for {} re-opened: trial call failed", self.provider);
            }
            _ => {}
        }
    }

    /// Hand back a trial that was admitted but never executed
    pub fn abandon_trial(&self, admission: BreakerAdmission) {
        let BreakerAdmission::Trial(generation) = admission else {
            return;
        };
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen
            && inner.trial_in_flight
            && inner.generation == generation
        {
            inner.trial_in_flight = false;
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Point-in-time view for health reporting
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let retry_in = match (inner.state, inner.last_failure) {
            (BreakerState::Open, Some(at)) => Some(self.config.cooldown.saturating_sub(at.elapsed())),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_in,
        }
    }

    fn start_trial(&self, inner: &mut BreakerInner) -> BreakerAdmission {
        inner.trial_in_flight = true;
        inner.generation += 1;
        BreakerAdmission::Trial(inner.generation)
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        inner.state = to;
        metrics::gauge!(BREAKER_STATE, "provider" => self.provider.clone()).set(to.gauge_value());
    }
}
