//! Upstream Asset Service Seam
//!
//! The cache consumes exactly one operation from the authoritative asset
//! service: `fetch(id) -> asset | absent`. The trait is async so transports
//! can do real I/O; the in-memory implementation exists for tests and for
//! hosts that keep a local authoritative set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::asset::Asset;
use crate::error::Result;

/// Upstream collaborator trait.
///
/// `fetch` must be side-effect-free on miss. Returning `Ok(None)` means the
/// asset authoritatively does not exist (recorded as a negative by the
/// cache); returning `Err` means the service itself failed (never recorded
/// as a negative).
#[async_trait]
pub trait AssetUpstream: Send + Sync {
    /// Fetch an asset by ID, or report it absent.
    async fn fetch(&self, id: &str) -> Result<Option<Asset>>;

    /// Stable identity token for self-loop detection.
    ///
    /// The cache compares this against its own instance ID before issuing a
    /// fetch; an upstream that resolves back to the same cache instance is
    /// short-circuited to miss.
    fn instance_id(&self) -> Uuid;
}

/// In-memory upstream for tests and embedded hosts.
///
/// Uses DashMap for lock-free concurrent access and counts fetches so tests
/// can assert on single-flight behavior.
pub struct InMemoryUpstream {
    assets: DashMap<String, Asset>,
    fetches: AtomicU64,
    instance: Uuid,
}

impl Default for InMemoryUpstream {
    fn default() -> Self {
        Self {
            assets: DashMap::new(),
            fetches: AtomicU64::new(0),
            instance: Uuid::new_v4(),
        }
    }
}

impl InMemoryUpstream {
    /// Create an empty upstream
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an upstream pre-populated with assets
    pub fn with_assets(assets: impl IntoIterator<Item = Asset>) -> Arc<Self> {
        let upstream = Self::new();
        for asset in assets {
            upstream.assets.insert(asset.id.clone(), asset);
        }
        Arc::new(upstream)
    }

    /// Insert or replace an asset
    pub fn insert(&self, asset: Asset) {
        self.assets.insert(asset.id.clone(), asset);
    }

    /// Remove an asset
    pub fn remove(&self, id: &str) {
        self.assets.remove(id);
    }

    /// Number of `fetch` calls observed
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AssetUpstream for InMemoryUpstream {
    async fn fetch(&self, id: &str) -> Result<Option<Asset>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.assets.get(id).map(|a| a.clone()))
    }

    fn instance_id(&self) -> Uuid {
        self.instance
    }
}

// =============================================================================
// Tests
// =============================================================================
