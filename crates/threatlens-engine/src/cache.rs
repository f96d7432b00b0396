//! Verdict cache keyed by fingerprint and provider
//!
//! A pure key-value layer with expiry: it knows nothing about aggregation.
//! Expired entries are never served; reads evict them lazily and
//! [`CacheStore::sweep_expired`] reclaims the rest.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderVerdict};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    verdict: ProviderVerdict,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, HashMap<String, CacheEntry>>,
    len: usize,
}

impl CacheInner {
    fn remove(&mut self, fingerprint: &Fingerprint, provider: &str) -> bool {
        let Some(by_provider) = self.entries.get_mut(fingerprint) else {
            return false;
        };
        let removed = by_provider.remove(provider).is_some();
        if by_provider.is_empty() {
            self.entries.remove(fingerprint);
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn retain_live(&mut self, now: Instant) -> usize {
        let before = self.len;
        self.entries.retain(|_, by_provider| {
            by_provider.retain(|_, entry| entry.is_live(now));
            !by_provider.is_empty()
        });
        self.len = self.entries.values().map(HashMap::len).sum();
        before - self.len
    }

    /// Drop the tenth of entries closest to expiry (at least one)
    fn evict_soonest(&mut self) {
        let mut by_expiry: Vec<(Instant, Fingerprint, String)> = self
            .entries
            .iter()
            .flat_map(|(fp, by_provider)| {
                by_provider
                    .iter()
                    .map(move |(provider, entry)| (entry.expires_at, fp.clone(), provider.clone()))
            })
            .collect();
        by_expiry.sort_by(|a, b| a.0.cmp(&b.0));

        let count = (self.len / 10).max(1);
        for (_, fingerprint, provider) in by_expiry.into_iter().take(count) {
            self.remove(&fingerprint, &provider);
        }
    }
}

/// Concurrency-safe verdict cache
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<CacheInner>,
    max_entries: Option<usize>,
}

impl CacheStore {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache holding at most `max_entries` verdicts
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Look up a live verdict; the returned copy is marked as cached
    pub fn get(&self, fingerprint: &Fingerprint, provider: &str) -> Option<ProviderVerdict> {
        let now = Instant::now();
        {
            let inner = self.inner.read();
            let entry = inner.entries.get(fingerprint)?.get(provider)?;
            if entry.is_live(now) {
                return Some(entry.verdict.as_cached());
            }
        }

        // Expired: evict under the write lock, re-checking in case a fresh
        // verdict landed between the two locks.
        let mut inner = self.inner.write();
        let live = inner
            .entries
            .get(fingerprint)
            .and_then(|by_provider| by_provider.get(provider))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.verdict.as_cached());
        if live.is_none() {
            inner.remove(fingerprint, provider);
            debug!("Evicted expired {} verdict for {}", provider, fingerprint.short());
        }
        live
    }

    /// Store a verdict for `ttl`; a zero TTL stores nothing
    pub fn put(&self, fingerprint: &Fingerprint, provider: &str, verdict: ProviderVerdict, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            verdict: ProviderVerdict {
                from_cache: false,
                ..verdict
            },
            expires_at: Instant::now() + ttl,
        };

        let mut inner = self.inner.write();
        let exists = inner
            .entries
            .get(fingerprint)
            .is_some_and(|by_provider| by_provider.contains_key(provider));

        if !exists {
            if let Some(max) = self.max_entries {
                if inner.len >= max {
                    inner.retain_live(Instant::now());
                }
                if inner.len >= max {
                    inner.evict_soonest();
                }
            }
            inner.len += 1;
        }

        inner
            .entries
            .entry(fingerprint.clone())
            .or_default()
            .insert(provider.to_string(), entry);
    }

    /// Remove every provider's verdict for one fingerprint
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> usize {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(fingerprint).map_or(0, |m| m.len());
        inner.len -= removed;
        removed
    }

    /// Remove one provider's verdict for one fingerprint
    pub fn invalidate_entry(&self, fingerprint: &Fingerprint, provider: &str) -> bool {
        self.inner.write().remove(fingerprint, provider)
    }

    /// Remove everything
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let removed = inner.len;
        inner.entries.clear();
        inner.len = 0;
        removed
    }

    /// Drop all expired entries, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.inner.write().retain_live(Instant::now())
    }

    /// Number of stored entries, including not-yet-evicted expired ones
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
