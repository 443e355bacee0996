//! Expiring Memory Tier
//!
//! Strong references with a fixed TTL. Unlike the weak tier this map keeps
//! assets alive, so it is disabled by default and sized by its TTL rather
//! than by entry count. Expired entries are removed lazily on lookup and
//! wholesale by the cleanup sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::asset::Asset;

struct MemoryEntry {
    asset: Arc<Asset>,
    expires: Instant,
}

/// Expiring in-memory tier
pub struct MemoryTier {
    map: DashMap<String, MemoryEntry>,
    ttl: Duration,
}

impl MemoryTier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: DashMap::new(),
            ttl,
        }
    }

    /// Get a live entry; expired entries are removed and count as miss.
    pub fn get(&self, id: &str) -> Option<Arc<Asset>> {
        let expired = match self.map.get(id) {
            Some(entry) if entry.expires > Instant::now() => {
                return Some(entry.asset.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map.remove(id);
        }
        None
    }

    /// Insert or refresh an entry; the expiry restarts from now.
    pub fn insert(&self, asset: Arc<Asset>) {
        self.map.insert(
            asset.id.clone(),
            MemoryEntry {
                asset,
                expires: Instant::now() + self.ttl,
            },
        );
    }

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

    /// Drop every expired entry. Called from the cleanup sweep.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires > now);
        before - self.map.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
