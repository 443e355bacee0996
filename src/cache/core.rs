//! Layered Cache Core
//!
//! Orchestrates the tier cascade: weak map, expiring memory map, on-disk
//! store, negative map, and the single-flight path to upstream. Lower-tier
//! hits refresh the tiers above them so hot assets migrate toward the
//! cheapest lookup; any successful hit or insert clears the ID's negative
//! entry.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::asset::{is_valid_id, Asset, AssetMetadata};
use crate::cache::config::CacheConfig;
use crate::cache::disk::{DiskTier, TouchDebounce};
use crate::cache::flight::{FlightMap, FlightOutcome};
use crate::cache::memory::MemoryTier;
use crate::cache::negative::NegativeTier;
use crate::cache::stats::CacheStats;
use crate::cache::weak::WeakTier;
use crate::cache::writer::WritePipeline;
use crate::error::{CacheError, Result};
use crate::scene::{DefaultAssetLoader, SceneView};
use crate::upstream::AssetUpstream;

/// Shared state behind every [`AssetCache`] handle.
pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    /// Identity token for upstream self-loop detection
    pub(crate) instance: Uuid,
    pub(crate) weak: WeakTier,
    pub(crate) memory: Option<MemoryTier>,
    pub(crate) negative: Option<NegativeTier>,
    pub(crate) disk: Option<DiskTier>,
    pub(crate) pipeline: Option<WritePipeline>,
    pub(crate) flight: FlightMap,
    pub(crate) stats: CacheStats,
    pub(crate) touch: Arc<TouchDebounce>,
    pub(crate) upstream: parking_lot::RwLock<Option<Arc<dyn AssetUpstream>>>,
    pub(crate) scenes: parking_lot::RwLock<Vec<Arc<dyn SceneView>>>,
    pub(crate) default_loader: parking_lot::RwLock<Option<Arc<dyn DefaultAssetLoader>>>,
    /// Sticky allowlist of default-asset IDs, exempt from cleanup
    pub(crate) default_assets: DashSet<String>,
    pub(crate) cleanup_running: AtomicBool,
    pub(crate) cleanup_cancel: AtomicBool,
    pub(crate) cleanup_timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Per-region deep-scan timestamps
    pub(crate) region_stamps: DashMap<Uuid, DateTime<Utc>>,
}

/// Concurrent multi-layer asset cache.
///
/// Cheap to clone; all clones share one set of tiers and workers.
#[derive(Clone)]
pub struct AssetCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl AssetCache {
    /// Build a cache from a configuration. The write pipeline and cleanup
    /// timer stay idle until [`start`](Self::start) (or the first scene
    /// attach) brings them up.
    pub fn new(config: CacheConfig) -> Self {
        let config = config.clamped();
        let touch = Arc::new(TouchDebounce::default());
        let in_progress: Arc<DashSet<std::path::PathBuf>> = Arc::new(DashSet::new());

        let memory = config
            .memory_enabled
            .then(|| MemoryTier::new(config.memory_ttl));
        let negative = config.negative_enabled.then(|| {
            NegativeTier::new(
                config.negative_ttl,
                config.negative_max_entries,
                config.negative_prune_batch,
            )
        });
        let (disk, pipeline) = if config.file_enabled {
            (
                Some(DiskTier::new(&config, in_progress.clone(), touch.clone())),
                Some(WritePipeline::new(
                    config.writer_workers,
                    in_progress,
                    touch.clone(),
                )),
            )
        } else {
            (None, None)
        };

        Self {
            inner: Arc::new(CacheInner {
                config,
                instance: Uuid::new_v4(),
                weak: WeakTier::new(),
                memory,
                negative,
                disk,
                pipeline,
                flight: FlightMap::new(),
                stats: CacheStats::new(),
                touch,
                upstream: parking_lot::RwLock::new(None),
                scenes: parking_lot::RwLock::new(Vec::new()),
                default_loader: parking_lot::RwLock::new(None),
                default_assets: DashSet::new(),
                cleanup_running: AtomicBool::new(false),
                cleanup_cancel: AtomicBool::new(false),
                cleanup_timer: parking_lot::Mutex::new(None),
                region_stamps: DashMap::new(),
            }),
        }
    }

    /// Register the authoritative asset service.
    pub fn set_upstream(&self, upstream: Arc<dyn AssetUpstream>) {
        if upstream.instance_id() == self.inner.instance {
            warn!("upstream resolves to this cache instance; fetches will short-circuit to miss");
        }
        *self.inner.upstream.write() = Some(upstream);
    }

    /// Register the default-assets plugin.
    pub fn set_default_loader(&self, loader: Arc<dyn DefaultAssetLoader>) {
        *self.inner.default_loader.write() = Some(loader);
    }

    /// Active configuration (post-clamp)
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Resolve an asset through every tier, reaching upstream on a full
    /// miss. Returns `None` for misses of every kind; failures never
    /// escape.
    pub async fn get(&self, id: &str) -> Option<Arc<Asset>> {
        if !is_valid_id(id) {
            return None;
        }
        self.count_request();

        if let Some(asset) = self.hit_upper_tiers(id).await {
            return Some(asset);
        }

        // File tier
        if let Some(disk) = &self.inner.disk {
            match disk.read(id, self.inner.config.touch_on_hit).await {
                Ok(asset) => {
                    let asset = Arc::new(asset);
                    self.inner.stats.record_disk_hit();
                    self.refresh_upper_tiers(&asset);
                    self.clear_negative(id);
                    return Some(asset);
                }
                Err(CacheError::NotFound) => {}
                Err(e) if e.is_bad_format() => {
                    // The corrupt file is already gone; the next request
                    // repopulates from upstream.
                    return None;
                }
                Err(e) => {
                    warn!(id, error = %e, "file tier read failed");
                }
            }
        }

        // Known-absent check before upstream
        if let Some(negative) = &self.inner.negative {
            if negative.contains(id) {
                return None;
            }
        }

        self.fetch_via_flight(id).await
    }

    /// Like [`get`](Self::get) but consults only the weak and memory
    /// tiers; never touches the file tier or upstream.
    pub fn get_from_memory(&self, id: &str) -> Option<Arc<Asset>> {
        if !is_valid_id(id) {
            return None;
        }
        self.count_request();
        // Shares the upper-tier hit policy, minus the file touch (this
        // path must not reach the filesystem).
        if let Some(asset) = self.inner.weak.get(id) {
            self.inner.stats.record_weak_hit();
            if let Some(memory) = &self.inner.memory {
                memory.insert(asset.clone());
            }
            self.clear_negative(id);
            return Some(asset);
        }
        if let Some(memory) = &self.inner.memory {
            if let Some(asset) = memory.get(id) {
                self.inner.stats.record_memory_hit();
                self.inner.weak.insert(&asset);
                self.clear_negative(id);
                return Some(asset);
            }
        }
        None
    }

    /// Presence check across weak/memory/file. Does not count as a hit
    /// and does not consult upstream.
    pub async fn check(&self, id: &str) -> bool {
        if !is_valid_id(id) {
            return false;
        }
        if self.inner.weak.get(id).is_some() {
            return true;
        }
        if let Some(memory) = &self.inner.memory {
            if memory.get(id).is_some() {
                return true;
            }
        }
        match &self.inner.disk {
            Some(disk) => disk.exists(id).await,
            None => false,
        }
    }

    /// Metadata for an asset, without handing out the bytes.
    pub async fn metadata(&self, id: &str) -> Option<AssetMetadata> {
        self.get(id).await.map(|asset| asset.metadata())
    }

    /// Content bytes for an asset.
    pub async fn data(&self, id: &str) -> Option<Bytes> {
        self.get(id).await.map(|asset| asset.data.clone())
    }

    // =========================================================================
    // Inserts
    // =========================================================================

    /// Insert an asset into every enabled tier.
    ///
    /// `replace=false` is the common content-addressed case: if a file for
    /// the ID already exists the write is skipped. `replace=true` rewrites
    /// the file atomically, retaining a backup sibling of the old bytes.
    pub fn cache(&self, asset: Asset, replace: bool) {
        self.cache_shared(Arc::new(asset), replace);
    }

    pub(crate) fn cache_shared(&self, asset: Arc<Asset>, replace: bool) {
        if !is_valid_id(&asset.id) {
            return;
        }
        self.refresh_upper_tiers(&asset);

        if let (Some(disk), Some(pipeline)) = (&self.inner.disk, &self.inner.pipeline) {
            if let Some(path) = disk.path_of(&asset.id) {
                match pipeline.submit(path, asset.clone(), replace) {
                    Ok(()) => {}
                    Err(CacheError::Contention) => {
                        // An equivalent or newer job already owns the path.
                        debug!(id = %asset.id, "write already in progress, submission dropped");
                    }
                    Err(e) => {
                        warn!(id = %asset.id, error = %e, "write submission failed");
                    }
                }
            }
        }

        self.clear_negative(&asset.id);
    }

    /// Record that upstream authoritatively lacks `id`.
    pub fn cache_negative(&self, id: &str) {
        if !is_valid_id(id) {
            return;
        }
        if let Some(negative) = &self.inner.negative {
            negative.insert(id);
        }
    }

    /// Store a host-created asset, minting identity as needed. Returns
    /// the ID the asset was stored under.
    pub fn store(&self, mut asset: Asset) -> String {
        if asset.uuid.is_nil() {
            asset.uuid = Uuid::new_v4();
        }
        if asset.id.trim().is_empty() {
            asset.id = asset.uuid.to_string();
        }
        let id = asset.id.clone();
        self.cache(asset, false);
        id
    }

    /// Replace the content of an existing asset. Returns false when the
    /// asset cannot be resolved.
    pub async fn update_content(&self, id: &str, data: Bytes) -> bool {
        let Some(existing) = self.get(id).await else {
            return false;
        };
        let mut updated = (*existing).clone();
        updated.data = data;
        self.cache(updated, true);
        true
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Remove one ID from every tier, best-effort on disk.
    pub async fn expire(&self, id: &str) {
        self.inner.weak.remove(id);
        if let Some(memory) = &self.inner.memory {
            memory.remove(id);
        }
        self.clear_negative(id);
        if let Some(disk) = &self.inner.disk {
            disk.remove(id).await;
        }
    }

    /// Drop everything: shard directories, memory and weak maps,
    /// negatives.
    pub async fn clear(&self) {
        self.clear_file().await;
        self.clear_memory();
        self.clear_negatives();
    }

    /// Drop the file tier's shard directories.
    pub async fn clear_file(&self) {
        if let Some(pipeline) = &self.inner.pipeline {
            // Let in-flight writes settle so the wipe is complete.
            pipeline.drain().await;
        }
        if let Some(disk) = &self.inner.disk {
            if let Err(e) = disk.clear().await {
                warn!(error = %e, "file tier clear failed");
            }
        }
    }

    /// Reset the memory and weak maps.
    pub fn clear_memory(&self) {
        if let Some(memory) = &self.inner.memory {
            memory.clear();
        }
        self.inner.weak.reset();
    }

    /// Drop every negative entry.
    pub fn clear_negatives(&self) {
        if let Some(negative) = &self.inner.negative {
            negative.clear();
        }
    }

    /// Wait until every accepted write job is durable. Intended for
    /// shutdown paths and tests.
    pub async fn flush(&self) {
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.drain().await;
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn count_request(&self) {
        let n = self.inner.stats.record_request();
        let cadence = self.inner.config.hit_rate_display;
        if cadence > 0 && n % cadence == 0 {
            let stats = &self.inner.stats;
            debug!(
                requests = n,
                hit_pct = stats.hit_ratio() * 100.0,
                weak = stats.weak_hits(),
                memory = stats.memory_hits(),
                file = stats.disk_hits(),
                "cache hit rates"
            );
        }
    }

    /// Weak and memory lookups with their promotion rules.
    async fn hit_upper_tiers(&self, id: &str) -> Option<Arc<Asset>> {
        if let Some(asset) = self.inner.weak.get(id) {
            self.inner.stats.record_weak_hit();
            if let Some(memory) = &self.inner.memory {
                memory.insert(asset.clone());
            }
            if self.inner.config.touch_on_hit {
                if let Some(disk) = &self.inner.disk {
                    if let Some(path) = disk.path_of(id) {
                        self.inner.touch.touch(&path).await;
                    }
                }
            }
            self.clear_negative(id);
            return Some(asset);
        }

        if let Some(memory) = &self.inner.memory {
            if let Some(asset) = memory.get(id) {
                self.inner.stats.record_memory_hit();
                // keep the weak map warm
                self.inner.weak.insert(&asset);
                self.clear_negative(id);
                return Some(asset);
            }
        }
        None
    }

    /// Populate the weak and memory tiers with an asset.
    fn refresh_upper_tiers(&self, asset: &Arc<Asset>) {
        self.inner.weak.insert(asset);
        if let Some(memory) = &self.inner.memory {
            memory.insert(asset.clone());
        }
    }

    fn clear_negative(&self, id: &str) {
        if let Some(negative) = &self.inner.negative {
            negative.remove(id);
        }
    }

    /// Full-miss path: deduplicated upstream fetch plus tier population.
    async fn fetch_via_flight(&self, id: &str) -> Option<Arc<Asset>> {
        let upstream = self.inner.upstream.read().clone();
        let Some(upstream) = upstream else {
            return None;
        };
        if upstream.instance_id() == self.inner.instance {
            debug!(id, "self-referential upstream, short-circuiting to miss");
            return None;
        }

        match self.inner.flight.fetch(id, upstream.as_ref()).await {
            FlightOutcome::Hit(asset) => {
                self.cache_shared(asset.clone(), false);
                Some(asset)
            }
            FlightOutcome::Absent => {
                self.cache_negative(id);
                None
            }
            FlightOutcome::Failed => None,
        }
    }
}

/// A cache can itself serve as an upstream, so hosts can chain a local
/// cache in front of a shared one. The instance token is what lets a
/// mis-wired chain (cache pointing at itself) be detected and refused.
#[async_trait]
impl AssetUpstream for AssetCache {
    async fn fetch(&self, id: &str) -> Result<Option<Asset>> {
        Ok(self.get(id).await.map(|asset| (*asset).clone()))
    }

    fn instance_id(&self) -> Uuid {
        self.inner.instance
    }
}

// =============================================================================
// Tests
// =============================================================================
