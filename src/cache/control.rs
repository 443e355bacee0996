//! Lifecycle & Control Surface
//!
//! Scene attach/detach drives startup and shutdown: the first attach
//! spawns the writer pool and cleanup timer, the last detach drains and
//! stops them. The operator console reaches the cache through the
//! `cfcache` verb surface, parsed here into a [`ControlCommand`] and
//! dispatched to a text-producing handler.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::core::AssetCache;
use crate::cache::disk::set_access_time_now;
use crate::cache::stats::{RegionScan, StatusReport};
use crate::scene::SceneView;

/// Default argument for `cachedefaultassets` when none is given
const DEFAULT_ASSET_SET: &str = "all";

/// Parsed `cfcache` console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `status` - report counters and per-region scan stamps
    Status,
    /// `clear [file] [memory]` - wipe the named tiers (both when unqualified)
    Clear { file: bool, memory: bool },
    /// `clearnegatives` - drop every negative entry
    ClearNegatives,
    /// `assets` - deep-touch scan across attached scenes
    DeepScan,
    /// `expire <datetime|now>` - cleanup pass with an explicit purge line
    Expire(DateTime<Utc>),
    /// `cachedefaultassets [set]` - load built-in assets into the cache
    CacheDefaultAssets(String),
    /// `deletedefaultassets` - evict built-ins and clear their allowlist
    DeleteDefaultAssets,
    /// `cleanbak` - delete every backup sibling
    CleanBak,
}

impl ControlCommand {
    /// Parse the tokens following the `cfcache` key.
    pub fn parse(args: &[&str]) -> Result<Self, String> {
        let usage = "usage: cfcache <status | clear [file] [memory] | clearnegatives | assets | \
                     expire <datetime|now> | cachedefaultassets [set] | deletedefaultassets | cleanbak>";
        let Some((verb, rest)) = args.split_first() else {
            return Err(usage.to_string());
        };
        match *verb {
            "status" => Ok(Self::Status),
            "clear" => {
                let file = rest.iter().any(|a| a.eq_ignore_ascii_case("file"));
                let memory = rest.iter().any(|a| a.eq_ignore_ascii_case("memory"));
                if rest.is_empty() {
                    Ok(Self::Clear {
                        file: true,
                        memory: true,
                    })
                } else if file || memory {
                    Ok(Self::Clear { file, memory })
                } else {
                    Err(format!("unrecognized clear target {:?}", rest[0]))
                }
            }
            "clearnegatives" => Ok(Self::ClearNegatives),
            "assets" => Ok(Self::DeepScan),
            "expire" => match rest.first() {
                Some(when) => Ok(Self::Expire(parse_when(when)?)),
                None => Err("expire requires a datetime or 'now'".to_string()),
            },
            "cachedefaultassets" => Ok(Self::CacheDefaultAssets(
                rest.first().unwrap_or(&DEFAULT_ASSET_SET).to_string(),
            )),
            "deletedefaultassets" => Ok(Self::DeleteDefaultAssets),
            "cleanbak" => Ok(Self::CleanBak),
            other => Err(format!("unknown command {other:?}; {usage}")),
        }
    }
}

fn parse_when(raw: &str) -> Result<DateTime<Utc>, String> {
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(format!(
        "could not parse {raw:?} as a datetime (try RFC 3339, YYYY-MM-DD, or 'now')"
    ))
}

/// What one deep-touch pass did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeepTouchSummary {
    /// UUIDs gathered from attached scenes
    pub referenced: usize,
    /// Files already present whose access time was refreshed
    pub touched: usize,
    /// Missing assets repopulated from upstream
    pub fetched: usize,
    /// Missing assets upstream could not supply
    pub misses: usize,
}

impl AssetCache {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring up the writer pool and the cleanup timer. Idempotent; called
    /// automatically by the first scene attach.
    pub fn start(&self) {
        self.inner.cleanup_cancel.store(false, Ordering::Relaxed);
        // A stop() may have aborted the timer mid-sweep; release the gate.
        self.inner.cleanup_running.store(false, Ordering::SeqCst);
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.start();
        }
        self.start_cleanup_timer();
        info!("asset cache started");
    }

    /// Stop the cleanup timer and drain the writer pool. Idempotent;
    /// called automatically when the last scene detaches.
    pub async fn stop(&self) {
        self.inner.cleanup_cancel.store(true, Ordering::Relaxed);
        let timer = self.inner.cleanup_timer.lock().take();
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(pipeline) = &self.inner.pipeline {
            pipeline.stop().await;
        }
        info!("asset cache stopped");
    }

    fn start_cleanup_timer(&self) {
        let Some(period) = self.inner.config.cleanup_period else {
            return;
        };
        let mut slot = self.inner.cleanup_timer.lock();
        if slot.is_some() {
            return;
        }
        let cache = self.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if cache.inner.cleanup_cancel.load(Ordering::Relaxed) {
                    break;
                }
                let purge_line = SystemTime::now() - cache.inner.config.file_ttl;
                cache.run_cleanup(purge_line).await;
            }
        }));
    }

    /// Register a scene as a consumer of this cache. Idempotent per
    /// region; the first attach starts the cache.
    pub fn attach_scene(&self, scene: Arc<dyn SceneView>) {
        let region = scene.region_id();
        {
            let mut scenes = self.inner.scenes.write();
            if scenes.iter().any(|s| s.region_id() == region) {
                return;
            }
            scenes.push(scene);
        }
        info!(%region, "scene attached");
        self.start();
    }

    /// Deregister a scene. When no scenes remain the cache shuts its
    /// background work down.
    pub async fn detach_scene(&self, region: Uuid) {
        let remaining = {
            let mut scenes = self.inner.scenes.write();
            scenes.retain(|s| s.region_id() != region);
            scenes.len()
        };
        info!(%region, remaining, "scene detached");
        if remaining == 0 {
            self.stop().await;
        }
    }

    // =========================================================================
    // Operations behind the verbs
    // =========================================================================

    /// Deep-touch scan: refresh last-access for every scene-referenced
    /// file and repopulate missing ones from upstream.
    ///
    /// Fetches go straight to the upstream service rather than through the
    /// single-flight coordinator, so a maintenance walk never contends
    /// with user-facing requests for token leadership.
    pub async fn deep_touch(&self) -> DeepTouchSummary {
        let gathered = self.gather_referenced();
        let upstream = self.inner.upstream.read().clone();
        let mut summary = DeepTouchSummary {
            referenced: gathered.len(),
            ..Default::default()
        };

        if let Some(disk) = &self.inner.disk {
            for (uuid, kind) in &gathered {
                let id = uuid.to_string();
                if let Some(path) = disk.path_of(&id) {
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        set_access_time_now(&path).await;
                        summary.touched += 1;
                        continue;
                    }
                }
                let Some(upstream) = &upstream else {
                    summary.misses += 1;
                    continue;
                };
                match upstream.fetch(&id).await {
                    Ok(Some(asset)) => {
                        self.cache(asset, false);
                        summary.fetched += 1;
                    }
                    Ok(None) => {
                        summary.misses += 1;
                    }
                    Err(e) => {
                        warn!(%uuid, reference = %kind, error = %e, "deep-touch fetch failed");
                        summary.misses += 1;
                    }
                }
            }
            self.flush().await;
        }

        self.stamp_regions().await;
        info!(
            referenced = summary.referenced,
            touched = summary.touched,
            fetched = summary.fetched,
            misses = summary.misses,
            "deep-touch scan complete"
        );
        summary
    }

    /// Record the deep-scan timestamp for every attached region, both in
    /// memory and as a root-level stamp file.
    async fn stamp_regions(&self) {
        let regions: Vec<Uuid> = {
            let scenes = self.inner.scenes.read();
            scenes.iter().map(|s| s.region_id()).collect()
        };
        let now = Utc::now();
        for region in regions {
            self.inner.region_stamps.insert(region, now);
            if let Some(disk) = &self.inner.disk {
                let stamp = disk.root().join(format!("RegionStatus_{region}.fac"));
                let body = format!("deep scan {}\n", now.to_rfc3339());
                if tokio::fs::create_dir_all(disk.root()).await.is_ok() {
                    if let Err(e) = tokio::fs::write(&stamp, body).await {
                        warn!(%region, error = %e, "failed to write region status stamp");
                    }
                }
            }
        }
    }

    /// Load the built-in assets selected by `what` and pin their IDs in
    /// the cleanup allowlist.
    pub async fn cache_default_assets(&self, what: &str) -> usize {
        let loader = self.inner.default_loader.read().clone();
        let Some(loader) = loader else {
            return 0;
        };
        let assets = loader.load(what);
        let count = assets.len();
        for asset in assets {
            self.inner.default_assets.insert(asset.id.clone());
            self.cache(asset, false);
        }
        info!(count, set = what, "default assets cached");
        count
    }

    /// Evict every pinned default asset and clear the allowlist.
    pub async fn delete_default_assets(&self) -> usize {
        let ids: Vec<String> = self
            .inner
            .default_assets
            .iter()
            .map(|id| id.key().clone())
            .collect();
        self.inner.default_assets.clear();
        let count = ids.len();
        for id in ids {
            self.expire(&id).await;
        }
        count
    }

    /// Assemble a point-in-time status report.
    pub fn status(&self) -> StatusReport {
        let stats = &self.inner.stats;
        let weak_entries = self.inner.weak.len();
        let (weak_sampled, weak_live) = self
            .inner
            .weak
            .sample_live(self.inner.config.weak_sample_target);
        let mut region_scans: Vec<RegionScan> = self
            .inner
            .region_stamps
            .iter()
            .map(|entry| RegionScan {
                region: *entry.key(),
                scanned_at: *entry.value(),
            })
            .collect();
        region_scans.sort_by_key(|scan| scan.region);

        StatusReport {
            requests: stats.requests(),
            weak_hits: stats.weak_hits(),
            memory_hits: stats.memory_hits(),
            disk_hits: stats.disk_hits(),
            total_hits: stats.total_hits(),
            hit_ratio: stats.hit_ratio(),
            inflight_joins: self.inner.flight.joins(),
            weak_entries,
            weak_sampled,
            weak_live_estimate: StatusReport::estimate_live(weak_entries, weak_sampled, weak_live),
            memory_entries: self.inner.memory.as_ref().map_or(0, |m| m.len()),
            negative_entries: self.inner.negative.as_ref().map_or(0, |n| n.len()),
            region_scans,
        }
    }

    /// Dispatch one console command and render its outcome as text.
    pub async fn execute(&self, command: ControlCommand) -> String {
        match command {
            ControlCommand::Status => self.status().to_string(),
            ControlCommand::Clear { file, memory } => {
                if file {
                    self.clear_file().await;
                }
                if memory {
                    self.clear_memory();
                }
                if file && memory {
                    self.clear_negatives();
                    "cleared file and memory tiers and negatives".to_string()
                } else if file {
                    "cleared file tier".to_string()
                } else {
                    "cleared memory tier".to_string()
                }
            }
            ControlCommand::ClearNegatives => {
                let before = self.inner.negative.as_ref().map_or(0, |n| n.len());
                self.clear_negatives();
                format!("dropped {before} negative entries")
            }
            ControlCommand::DeepScan => {
                let summary = self.deep_touch().await;
                format!(
                    "deep scan: {} referenced, {} touched, {} fetched, {} misses",
                    summary.referenced, summary.touched, summary.fetched, summary.misses
                )
            }
            ControlCommand::Expire(when) => {
                match self.run_cleanup(SystemTime::from(when)).await {
                    Some(summary) => format!(
                        "expired {} files, {} backups, {} directories",
                        summary.files_removed, summary.baks_removed, summary.dirs_removed
                    ),
                    None => "cleanup already running, try again later".to_string(),
                }
            }
            ControlCommand::CacheDefaultAssets(what) => {
                let count = self.cache_default_assets(&what).await;
                format!("cached {count} default assets")
            }
            ControlCommand::DeleteDefaultAssets => {
                let count = self.delete_default_assets().await;
                format!("deleted {count} default assets")
            }
            ControlCommand::CleanBak => {
                let removed = self.clean_backups().await;
                format!("removed {removed} backup files")
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
