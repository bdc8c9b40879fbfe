//! In-Memory Tick Cache
//!
//! `CacheStore` backed by a `DashMap`, giving per-key atomic writes without
//! a global lock. Expired entries are never served and are removed by a
//! periodic sweeper.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CacheEntry, CacheError, CacheStore};
use crate::domain::streaming::TickRecord;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Latest tick per symbol with TTL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `interval` until cancelled.
    pub async fn run_sweeper(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Cache sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = self.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.len(), "Purged expired cache entries");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, tick: TickRecord, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(tick, Utc::now(), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value().clone()))
    }
}
