//! Background Cleanup
//!
//! Periodic sweep over the negative map and the shard directories. Files
//! referenced by an attached scene or by the default-assets allowlist are
//! spared; everything else older than the purge line is deleted, stale
//! backup siblings are aged out, and emptied shard directories are
//! removed. The walk throttles itself so a big cache does not monopolize
//! the disk, and it checks a cancellation flag at every directory
//! boundary.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::core::AssetCache;
use crate::cache::filename;
use crate::scene::{gather_scene_references, ReferenceKind};

/// Filesystem operations between throttle yields
const THROTTLE_EVERY: usize = 16;

/// Pause inserted at each throttle point
const THROTTLE_PAUSE: Duration = Duration::from_millis(90);

/// What one cleanup run removed.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupSummary {
    pub negatives_removed: usize,
    pub files_removed: usize,
    pub baks_removed: usize,
    pub dirs_removed: usize,
    /// True when the run was cancelled partway
    pub cancelled: bool,
}

struct SweepCtx {
    /// File names exempt from deletion (scene-referenced + default assets)
    spared: HashSet<String>,
    purge_line: SystemTime,
    bak_enabled: bool,
    bak_cutoff: SystemTime,
    warn_at: usize,
    ops: AtomicUsize,
    files_removed: AtomicUsize,
    baks_removed: AtomicUsize,
    dirs_removed: AtomicUsize,
}

impl SweepCtx {
    async fn count_op(&self) {
        let ops = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % THROTTLE_EVERY == 0 {
            tokio::time::sleep(THROTTLE_PAUSE).await;
        }
    }
}

impl AssetCache {
    /// Run one cleanup pass with an explicit purge line.
    ///
    /// Returns `None` when a pass is already running (single-run-at-a-time
    /// gate); the timer and the `expire` verb both come through here.
    pub async fn run_cleanup(&self, purge_line: SystemTime) -> Option<CleanupSummary> {
        if self.inner.cleanup_running.swap(true, Ordering::SeqCst) {
            debug!("cleanup already running, skipping");
            return None;
        }
        let summary = self.cleanup_pass(purge_line).await;
        self.inner.cleanup_running.store(false, Ordering::SeqCst);
        Some(summary)
    }

    async fn cleanup_pass(&self, purge_line: SystemTime) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        // Expired negatives first; the map also self-prunes if over cap.
        if let Some(negative) = &self.inner.negative {
            summary.negatives_removed = negative.sweep();
        }
        if let Some(memory) = &self.inner.memory {
            memory.sweep();
        }

        let Some(disk) = &self.inner.disk else {
            // Nothing on disk; the weak map still gets its periodic reset.
            self.inner.weak.reset();
            return summary;
        };

        let ctx = SweepCtx {
            spared: self.spared_file_names(),
            purge_line,
            bak_enabled: self.inner.config.bak_cleanup_enabled,
            bak_cutoff: SystemTime::now() - self.inner.config.bak_max_age,
            warn_at: self.inner.config.cache_warn_at,
            ops: AtomicUsize::new(0),
            files_removed: AtomicUsize::new(0),
            baks_removed: AtomicUsize::new(0),
            dirs_removed: AtomicUsize::new(0),
        };

        let root = disk.root().to_path_buf();
        let mut cancelled = false;
        match tokio::fs::read_dir(&root).await {
            Ok(mut entries) => loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "cleanup failed to list cache root");
                        break;
                    }
                };
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    // Root-level files (region status stamps) stay.
                    continue;
                }
                match self.sweep_dir(entry.path(), &ctx).await {
                    Some(0) => {
                        if tokio::fs::remove_dir(entry.path()).await.is_ok() {
                            ctx.dirs_removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Some(_) => {}
                    None => {
                        cancelled = true;
                        break;
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "cleanup could not open cache root"),
        }

        summary.files_removed = ctx.files_removed.load(Ordering::Relaxed);
        summary.baks_removed = ctx.baks_removed.load(Ordering::Relaxed);
        summary.dirs_removed = ctx.dirs_removed.load(Ordering::Relaxed);
        summary.cancelled = cancelled;

        // The weak map exists to short-circuit live lookups, not to
        // persist; it re-warms from traffic.
        self.inner.weak.reset();

        info!(
            files = summary.files_removed,
            baks = summary.baks_removed,
            dirs = summary.dirs_removed,
            negatives = summary.negatives_removed,
            cancelled = summary.cancelled,
            "cache cleanup finished"
        );
        summary
    }

    /// Recursively sweep one shard directory.
    ///
    /// Returns the number of entries left in the directory, or `None` when
    /// the cancellation flag was observed (the partially processed
    /// directory is left as-is).
    fn sweep_dir<'a>(
        &'a self,
        dir: PathBuf,
        ctx: &'a SweepCtx,
    ) -> Pin<Box<dyn Future<Output = Option<usize>> + Send + 'a>> {
        Box::pin(async move {
            if self.cleanup_cancelled() {
                return None;
            }

            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cleanup skipping unreadable directory");
                    return Some(1);
                }
            };

            let mut seen = 0usize;
            let mut remaining = 0usize;
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "cleanup read_dir error");
                        break;
                    }
                };
                seen += 1;

                let path = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);

                if is_dir {
                    match self.sweep_dir(path.clone(), ctx).await {
                        Some(0) => {
                            ctx.count_op().await;
                            if tokio::fs::remove_dir(&path).await.is_ok() {
                                ctx.dirs_removed.fetch_add(1, Ordering::Relaxed);
                            } else {
                                remaining += 1;
                            }
                        }
                        Some(_) => remaining += 1,
                        None => return None,
                    }
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if self.sweep_file(&path, &name, ctx).await {
                    remaining += 1;
                }
            }

            if seen > ctx.warn_at {
                warn!(
                    dir = %dir.display(),
                    entries = seen,
                    "cache directory exceeds warning threshold, consider deeper sharding"
                );
            }
            Some(remaining)
        })
    }

    /// Handle one regular file; returns true if the file was kept.
    async fn sweep_file(&self, path: &PathBuf, name: &str, ctx: &SweepCtx) -> bool {
        if name.ends_with(".bak") {
            if !ctx.bak_enabled {
                return true;
            }
            let stale = file_modified(path)
                .await
                .map(|t| t < ctx.bak_cutoff)
                .unwrap_or(false);
            if !stale {
                return true;
            }
            ctx.count_op().await;
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    ctx.baks_removed.fetch_add(1, Ordering::Relaxed);
                    false
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete stale backup");
                    true
                }
            }
        } else {
            if ctx.spared.contains(name) {
                return true;
            }
            let expired = file_accessed(path)
                .await
                .map(|t| t < ctx.purge_line)
                .unwrap_or(false);
            if !expired {
                return true;
            }
            ctx.count_op().await;
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    ctx.files_removed.fetch_add(1, Ordering::Relaxed);
                    self.inner.weak.remove(name);
                    false
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete expired cache file");
                    true
                }
            }
        }
    }

    /// Delete every `.bak` sibling under the cache root, regardless of
    /// age. Backs the `cleanbak` verb.
    pub async fn clean_backups(&self) -> usize {
        let Some(disk) = &self.inner.disk else {
            return 0;
        };
        let mut removed = 0;
        let mut stack = vec![disk.root().to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    stack.push(path);
                } else if path.extension().is_some_and(|ext| ext == "bak")
                    && tokio::fs::remove_file(&path).await.is_ok()
                {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Union of every attached scene's referenced UUIDs.
    pub(crate) fn gather_referenced(&self) -> HashMap<Uuid, ReferenceKind> {
        let scenes = self.inner.scenes.read().clone();
        let mut gathered = HashMap::new();
        for scene in &scenes {
            gather_scene_references(scene.as_ref(), &mut gathered);
        }
        debug!(
            scenes = scenes.len(),
            referenced = gathered.len(),
            "scene gather complete"
        );
        gathered
    }

    /// File names exempt from this sweep: scene-referenced UUIDs plus the
    /// sticky default-assets allowlist.
    fn spared_file_names(&self) -> HashSet<String> {
        let config = &self.inner.config;
        let mut spared = HashSet::new();
        for uuid in self.gather_referenced().keys() {
            if let Some(name) =
                filename::file_name_of(&uuid.to_string(), config.tiers, config.tier_len)
            {
                spared.insert(name);
            }
        }
        for id in self.inner.default_assets.iter() {
            if let Some(name) = filename::file_name_of(id.key(), config.tiers, config.tier_len) {
                spared.insert(name);
            }
        }
        spared
    }

    fn cleanup_cancelled(&self) -> bool {
        self.inner.cleanup_cancel.load(Ordering::Relaxed)
    }
}

async fn file_accessed(path: &PathBuf) -> Option<SystemTime> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.accessed().or_else(|_| meta.modified()).ok()
}

async fn file_modified(path: &PathBuf) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

// =============================================================================
// Tests
// =============================================================================
