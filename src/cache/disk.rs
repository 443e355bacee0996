//! On-Disk Tier — Read Path
//!
//! Reads serialized assets from the tier-sharded store, honoring write
//! reservations with a brief bounded backoff instead of racing the writer
//! pool. Corrupt records are deleted so the next request repopulates from
//! upstream; an empty file is a plain miss.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use crate::asset::Asset;
use crate::cache::codec::{self, CodecLimits};
use crate::cache::config::{CacheConfig, TOUCH_DEBOUNCE};
use crate::cache::filename;
use crate::error::{CacheError, Result};

/// Debounced last-access touches, at most one per path per window.
///
/// Shared between the read path (touch-on-hit) and the writer fast path so
/// both honor the same per-path window.
pub struct TouchDebounce {
    last: DashMap<PathBuf, Instant>,
    window: Duration,
}

impl Default for TouchDebounce {
    fn default() -> Self {
        Self::new(TOUCH_DEBOUNCE)
    }
}

impl TouchDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            last: DashMap::new(),
            window,
        }
    }

    /// Update the file's access time if the path is outside its window.
    pub async fn touch(&self, path: &Path) {
        let now = Instant::now();
        let due = match self.last.get(path) {
            Some(prev) => now.duration_since(*prev) >= self.window,
            None => true,
        };
        if !due {
            return;
        }
        self.last.insert(path.to_path_buf(), now);
        set_access_time_now(path).await;
    }

    pub fn clear(&self) {
        self.last.clear();
    }
}

/// Set a file's access (and modified) time to now, bypassing any debounce.
/// Deep-touch uses this directly so a maintenance walk always refreshes.
pub(crate) async fn set_access_time_now(path: &Path) {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&path)?;
        let times = std::fs::FileTimes::new()
            .set_accessed(SystemTime::now())
            .set_modified(SystemTime::now());
        file.set_times(times)
    })
    .await;

    if let Ok(Err(e)) = result {
        debug!(error = %e, "access-time touch failed");
    }
}

/// On-disk tier
pub struct DiskTier {
    root: PathBuf,
    tiers: u32,
    tier_len: u32,
    limits: CodecLimits,
    backoff_attempts: u32,
    backoff_initial: Duration,
    backoff_max: Duration,
    /// Paths currently reserved by the write pipeline
    in_progress: Arc<DashSet<PathBuf>>,
    touch: Arc<TouchDebounce>,
}

impl DiskTier {
    pub fn new(
        config: &CacheConfig,
        in_progress: Arc<DashSet<PathBuf>>,
        touch: Arc<TouchDebounce>,
    ) -> Self {
        Self {
            root: config.cache_root.clone(),
            tiers: config.tiers,
            tier_len: config.tier_len,
            limits: CodecLimits {
                max_string_bytes: config.max_string_bytes,
                max_data_bytes: config.max_data_bytes,
            },
            backoff_attempts: config.backoff_attempts,
            backoff_initial: config.backoff_initial,
            backoff_max: config.backoff_max,
            in_progress,
            touch,
        }
    }

    /// Base directory of the tier
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the on-disk path for an ID
    pub fn path_of(&self, id: &str) -> Option<PathBuf> {
        filename::path_of(&self.root, id, self.tiers, self.tier_len)
    }

    /// Read and decode the asset stored for `id`.
    ///
    /// `NotFound` covers a missing path, an empty file, and a path still
    /// reserved for writing after the backoff budget is spent. `BadFormat`
    /// deletes the offending file before returning.
    pub async fn read(&self, id: &str, touch_on_hit: bool) -> Result<Asset> {
        let path = self.path_of(id).ok_or(CacheError::NotFound)?;
        self.await_reservation(&path).await?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

        // A zero-length file is a half-created artifact, not corruption
        if bytes.is_empty() {
            return Err(CacheError::NotFound);
        }

        match codec::decode(&bytes, &self.limits) {
            Ok(asset) => {
                if touch_on_hit {
                    self.touch.touch(&path).await;
                }
                Ok(asset)
            }
            Err(e) => {
                warn!(id, path = %path.display(), error = %e, "corrupt cache file, deleting");
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    /// True if a file exists for `id`. Does not count as a hit.
    pub async fn exists(&self, id: &str) -> bool {
        match self.path_of(id) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Best-effort removal of the file for `id` and its backup sibling.
    pub async fn remove(&self, id: &str) {
        if let Some(path) = self.path_of(id) {
            let _ = tokio::fs::remove_file(&path).await;
            let _ = tokio::fs::remove_file(bak_path(&path)).await;
        }
    }

    /// Drop every shard directory under the root. Root-level files such as
    /// region status stamps are left in place.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!(path = %entry.path().display(), error = %e, "failed to drop shard directory");
                }
            }
        }
        self.touch.clear();
        Ok(())
    }

    /// Wait out a write reservation with exponential backoff.
    ///
    /// If the path is still reserved once the retry budget is spent, the
    /// read is abandoned as a miss rather than risking a torn read.
    async fn await_reservation(&self, path: &Path) -> Result<()> {
        if !self.in_progress.contains(path) {
            return Ok(());
        }
        let mut delay = self.backoff_initial;
        for _ in 0..self.backoff_attempts {
            tokio::time::sleep(delay).await;
            if !self.in_progress.contains(path) {
                return Ok(());
            }
            delay = (delay * 2).min(self.backoff_max);
        }
        Err(CacheError::NotFound)
    }
}

/// The backup sibling for a cache file
pub fn bak_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

// =============================================================================
// Tests
// =============================================================================
