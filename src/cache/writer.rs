//! Write Pipeline
//!
//! Persists assets without blocking callers and without torn reads. A
//! submission first claims the target path in the shared in-progress set
//! (one writer per path, ever), then rides a bounded queue to a small pool
//! of worker tasks. Workers write a random-named temp sibling, flush it,
//! and commit with a rename so readers only ever observe a complete
//! previous version or a complete new one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::asset::Asset;
use crate::cache::codec;
use crate::cache::disk::{bak_path, TouchDebounce};
use crate::error::{CacheError, Result};

/// Submission queue capacity
pub const QUEUE_CAPACITY: usize = 1_000;

/// One unit of work for a writer worker
struct WriteJob {
    path: PathBuf,
    asset: Arc<Asset>,
    replace: bool,
}

/// Bounded-queue writer pool.
///
/// Constructed idle; [`start`](Self::start) spawns the workers and
/// [`stop`](Self::stop) drains and joins them, so the host can cycle the
/// pool across scene attach/detach without rebuilding the cache.
pub struct WritePipeline {
    workers: usize,
    in_progress: Arc<DashSet<PathBuf>>,
    touch: Arc<TouchDebounce>,
    /// Jobs accepted but not yet finished
    pending: Arc<AtomicUsize>,
    tx: parking_lot::Mutex<Option<mpsc::Sender<WriteJob>>>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WritePipeline {
    pub fn new(
        workers: usize,
        in_progress: Arc<DashSet<PathBuf>>,
        touch: Arc<TouchDebounce>,
    ) -> Self {
        Self {
            workers,
            in_progress,
            touch,
            pending: Arc::new(AtomicUsize::new(0)),
            tx: parking_lot::Mutex::new(None),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(&self) {
        let mut tx_slot = self.tx.lock();
        if tx_slot.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock();
        for _ in 0..self.workers {
            let rx = rx.clone();
            let in_progress = self.in_progress.clone();
            let pending = self.pending.clone();
            let touch = self.touch.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    if let Err(e) = persist(&job, &touch).await {
                        warn!(
                            id = %job.asset.id,
                            path = %job.path.display(),
                            error = %e,
                            "asset write failed"
                        );
                    }
                    in_progress.remove(&job.path);
                    pending.fetch_sub(1, Ordering::Release);
                }
            }));
        }
        *tx_slot = Some(tx);
    }

    /// Reserve the path and enqueue a write.
    ///
    /// `Contention` means another job already holds the path; the caller
    /// drops the submission silently per the write-pipeline contract. A
    /// full or stopped queue surfaces as a transient I/O error.
    pub fn submit(&self, path: PathBuf, asset: Arc<Asset>, replace: bool) -> Result<()> {
        if !self.in_progress.insert(path.clone()) {
            return Err(CacheError::Contention);
        }

        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            self.in_progress.remove(&path);
            return Err(queue_unavailable("writer pool not started"));
        };

        self.pending.fetch_add(1, Ordering::Acquire);
        let job = WriteJob {
            path: path.clone(),
            asset,
            replace,
        };
        if let Err(e) = tx.try_send(job) {
            self.pending.fetch_sub(1, Ordering::Release);
            self.in_progress.remove(&path);
            return Err(queue_unavailable(&format!("write queue rejected job: {e}")));
        }
        Ok(())
    }

    /// True if a write reservation is held for `path`
    pub fn is_reserved(&self, path: &Path) -> bool {
        self.in_progress.contains(path)
    }

    /// Wait until every accepted job has been persisted.
    pub async fn drain(&self) {
        while self.pending.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Drain, close the queue, and join the workers.
    pub async fn stop(&self) {
        self.drain().await;
        let tx = self.tx.lock().take();
        drop(tx);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        debug!("writer pool stopped");
    }

    pub fn is_started(&self) -> bool {
        self.tx.lock().is_some()
    }
}

fn queue_unavailable(msg: &str) -> CacheError {
    CacheError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, msg))
}

/// Write one asset to its target path.
///
/// Commit order matters for crash recovery: the temp file is complete and
/// flushed before the target is touched, and when a backup is requested the
/// old bytes are copied aside before the rename lands the new ones.
async fn persist(job: &WriteJob, touch: &TouchDebounce) -> Result<()> {
    let target = &job.path;
    let exists = tokio::fs::try_exists(target).await.unwrap_or(false);

    // Fast path: content-addressed assets never change, so an existing
    // file already holds these bytes.
    if !job.replace && exists {
        touch.touch(target).await;
        return Ok(());
    }

    let parent = target
        .parent()
        .ok_or_else(|| queue_unavailable("target path has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!("{}.tmp", Uuid::new_v4().simple()));
    let encoded = codec::encode(&job.asset);

    let write_result: Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;
    if let Err(e) = write_result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }

    if job.replace && exists {
        // Retain the previous version; cleanup ages these out.
        if let Err(e) = tokio::fs::copy(target, bak_path(target)).await {
            debug!(path = %target.display(), error = %e, "backup copy failed");
        }
    }

    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
