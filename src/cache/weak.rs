//! Weak-Reference Tier
//!
//! The hottest lookup path: a map of ID to `Weak<Asset>` handles populated
//! on every successful lookup or insert. Retention is bounded by the
//! allocator, not by this tier: once the last `Arc<Asset>` outside the
//! cache is dropped (and the memory tier has let go), the handle dangles
//! and the next lookup treats it as a miss.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::asset::Asset;

/// Weak-reference map tier
#[derive(Default)]
pub struct WeakTier {
    map: DashMap<String, Weak<Asset>>,
}

impl WeakTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to upgrade the handle for `id`.
    ///
    /// A dangling handle is removed on the way out so the map does not
    /// accumulate dead entries between cleanup sweeps.
    pub fn get(&self, id: &str) -> Option<Arc<Asset>> {
        match self.map.get(id).map(|w| w.upgrade()) {
            Some(Some(asset)) => Some(asset),
            Some(None) => {
                self.map.remove(id);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh the handle for an asset.
    pub fn insert(&self, asset: &Arc<Asset>) {
        self.map.insert(asset.id.clone(), Arc::downgrade(asset));
    }

    pub fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    /// Total entries, live or dangling
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every entry. Cleanup does this at the end of a sweep; the map
    /// re-warms from subsequent lookups.
    pub fn reset(&self) {
        self.map.clear();
    }

    /// Count live handles in a sample of up to `target` entries.
    ///
    /// Returns `(sampled, live)`; status reports scale `live / sampled` by
    /// the total entry count for an approximate live figure.
    pub fn sample_live(&self, target: usize) -> (usize, usize) {
        let mut sampled = 0;
        let mut live = 0;
        for entry in self.map.iter() {
            if sampled >= target {
                break;
            }
            sampled += 1;
            if entry.value().strong_count() > 0 {
                live += 1;
            }
        }
        (sampled, live)
    }
}

// =============================================================================
// Tests
// =============================================================================
