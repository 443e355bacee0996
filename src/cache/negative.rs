//! Negative Cache
//!
//! Bounded, time-expiring map of IDs known to be absent from upstream.
//! A hit here short-circuits the request before it reaches the upstream
//! service. The map is capped: when it grows past `max_entries` a prune
//! pass samples a bounded slice of entries and evicts the ones closest to
//! expiry, the same collect/sort/evict shape the sized tiers use.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Upper bound on entries examined by one prune pass
const PRUNE_SAMPLE: usize = 5_000;

/// Bounded negative-lookup map
pub struct NegativeTier {
    map: DashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
    prune_batch: usize,
}

impl NegativeTier {
    pub fn new(ttl: Duration, max_entries: usize, prune_batch: usize) -> Self {
        Self {
            map: DashMap::new(),
            ttl,
            max_entries,
            prune_batch,
        }
    }

    /// True if `id` has a live negative entry. Expired entries are removed
    /// on the way out and count as absent.
    pub fn contains(&self, id: &str) -> bool {
        let expired = match self.map.get(id) {
            Some(expiry) if *expiry > Instant::now() => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map.remove(id);
        }
        false
    }

    /// Insert or refresh the entry for `id`, then prune opportunistically
    /// if the map has grown past its cap.
    pub fn insert(&self, id: &str) {
        self.map.insert(id.to_string(), Instant::now() + self.ttl);
        if self.map.len() > self.max_entries {
            self.prune();
        }
    }

    /// Remove the entry for `id`. Any successful insert or hit of the ID
    /// goes through here.
    pub fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop expired entries, then prune if still over capacity. Called by
    /// the cleanup sweep; returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, expiry| *expiry > now);
        let mut removed = before - self.map.len();
        if self.map.len() > self.max_entries {
            removed += self.prune();
        }
        removed
    }

    /// Evict up to `prune_batch` of the oldest-expiry entries among a
    /// sample of at most [`PRUNE_SAMPLE`]. One pass may leave the map over
    /// cap; the next insert or sweep takes another bite.
    fn prune(&self) -> usize {
        let mut candidates: Vec<(String, Instant)> = self
            .map
            .iter()
            .take(PRUNE_SAMPLE)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        candidates.sort_by_key(|(_, expiry)| *expiry);

        let mut evicted = 0;
        for (id, _) in candidates.into_iter().take(self.prune_batch) {
            if self.map.remove(&id).is_some() {
                evicted += 1;
            }
        }
        debug!(evicted, remaining = self.map.len(), "negative cache pruned");
        evicted
    }
}

// =============================================================================
// Tests
// =============================================================================
