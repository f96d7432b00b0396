//! Per-provider request quotas
//!
//! Each provider has two fixed windows, one minute and one day long. A call
//! is granted only when both windows have budget left, and granting charges
//! both under the same lock so concurrent queries can never over-admit.
//! Rejection is immediate; there is no queuing or backoff here.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Request ceilings for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Calls allowed per minute window
    pub per_minute: u32,
    /// Calls allowed per day window
    pub per_day: u32,
}

impl RateLimit {
    /// Create a new rate limit
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_day,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(60, 10_000)
    }
}

/// Remaining budget for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub remaining_per_minute: u32,
    pub remaining_per_day: u32,
    /// Time until the minute window resets
    pub minute_resets_in: Duration,
    /// Time until the day window resets
    pub day_resets_in: Duration,
}

#[derive(Debug)]
struct Window {
    limit: u32,
    used: u32,
    started: Instant,
    length: Duration,
}

impl Window {
    fn new(limit: u32, length: Duration, now: Instant) -> Self {
        Self {
            limit,
            used: 0,
            started: now,
            length,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started) >= self.length {
            self.started = now;
            self.used = 0;
        }
    }

    fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    fn resets_in(&self, now: Instant) -> Duration {
        self.length.saturating_sub(now.duration_since(self.started))
    }
}

#[derive(Debug)]
struct ProviderWindows {
    minute: Window,
    day: Window,
}

/// Quota tracker shared by every query
#[derive(Debug, Default)]
pub struct RateLimiter {
    providers: HashMap<String, Mutex<ProviderWindows>>,
}

impl RateLimiter {
    /// Create an empty rate limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's ceilings; re-registering resets its windows
    pub fn register(&mut self, provider: impl Into<String>, limit: RateLimit) {
        let now = Instant::now();
        self.providers.insert(
            provider.into(),
            Mutex::new(ProviderWindows {
                minute: Window::new(limit.per_minute, MINUTE, now),
                day: Window::new(limit.per_day, DAY, now),
            }),
        );
    }

    /// Try to charge one call against the provider's quota.
    ///
    /// Unknown providers are never granted. A denied call leaves both
    /// counters untouched.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let Some(windows) = self.providers.get(provider) else {
            return false;
        };

        let now = Instant::now();
        let mut windows = windows.lock();
        windows.minute.roll(now);
        windows.day.roll(now);

        if windows.minute.remaining() == 0 || windows.day.remaining() == 0 {
            return false;
        }

        windows.minute.used += 1;
        windows.day.used += 1;
        true
    }

    /// Remaining budget and reset times
    pub fn status(&self, provider: &str) -> Option<RateLimitStatus> {
        let windows = self.providers.get(provider)?;
        let now = Instant::now();
        let mut windows = windows.lock();
        windows.minute.roll(now);
        windows.day.roll(now);

        Some(RateLimitStatus {
            remaining_per_minute: windows.minute.remaining(),
            remaining_per_day: windows.day.remaining(),
            minute_resets_in: windows.minute.resets_in(now),
            day_resets_in: windows.day.resets_in(now),
        })
    }
}
