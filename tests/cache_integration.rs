//! Integration tests for the layered asset cache.
//!
//! Exercises the public surface end-to-end: single-flight deduplication,
//! negative-cache TTLs, atomic replace with backups, cleanup sparing of
//! scene-referenced assets, corrupted-file self-heal, and write
//! contention.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use uuid::Uuid;

use strata::{
    Asset, AssetCache, AssetUpstream, CacheConfig, InMemoryUpstream, Result, SceneView,
};

// =============================================================================
// Test Doubles
// =============================================================================

/// Upstream that sleeps before answering and counts its calls.
struct SlowUpstream {
    delay: Duration,
    asset: Option<Asset>,
    calls: AtomicU64,
    instance: Uuid,
}

impl SlowUpstream {
    fn new(delay: Duration, asset: Option<Asset>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            asset,
            calls: AtomicU64::new(0),
            instance: Uuid::new_v4(),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetUpstream for SlowUpstream {
    async fn fetch(&self, _id: &str) -> Result<Option<Asset>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.asset.clone())
    }

    fn instance_id(&self) -> Uuid {
        self.instance
    }
}

struct StubScene {
    region: Uuid,
    referenced: Vec<Uuid>,
}

impl SceneView for StubScene {
    fn region_id(&self) -> Uuid {
        self.region
    }
    fn terrain_textures(&self) -> Vec<Uuid> {
        vec![]
    }
    fn environment_assets(&self) -> Vec<Uuid> {
        vec![]
    }
    fn parcel_environment_assets(&self) -> Vec<Uuid> {
        vec![]
    }
    fn object_assets(&self) -> Vec<Uuid> {
        self.referenced.clone()
    }
    fn avatar_bake_textures(&self) -> Vec<Uuid> {
        vec![]
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        cache_root: dir.path().to_path_buf(),
        cleanup_period: None,
        ..Default::default()
    }
}

fn started(config: CacheConfig) -> AssetCache {
    let cache = AssetCache::new(config);
    cache.start();
    cache
}

fn file_path(cache: &AssetCache, id: &str) -> std::path::PathBuf {
    let root = cache.config().cache_root.clone();
    strata::cache::filename::path_of(
        &root,
        id,
        cache.config().tiers,
        cache.config().tier_len,
    )
    .unwrap()
}

/// Rewind a file's access and modified times.
fn age_file(path: &std::path::Path, age: Duration) {
    let past = SystemTime::now() - age;
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_times(
        std::fs::FileTimes::new()
            .set_accessed(past)
            .set_modified(past),
    )
    .unwrap();
}

// =============================================================================
// Scenario 1: single-flight join
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_collapses_concurrent_misses() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));
    let asset = Asset::new("abcde", Bytes::from_static(b"shared"));
    let expected_uuid = asset.uuid;
    let upstream = SlowUpstream::new(Duration::from_millis(200), Some(asset));
    cache.set_upstream(upstream.clone());

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move { cache.get("abcde").await }));
    }

    for task in tasks {
        let asset = task.await.unwrap().expect("every requester gets the asset");
        assert_eq!(asset.uuid, expected_uuid);
    }

    assert_eq!(upstream.calls(), 1, "exactly one upstream fetch");
    assert!(cache.status().inflight_joins >= 49);
    cache.stop().await;
}

// =============================================================================
// Scenario 2: negative cache TTL
// =============================================================================

#[tokio::test]
async fn negative_entry_expires_then_refetches() {
    let dir = TempDir::new().unwrap();
    let cache = started(CacheConfig {
        negative_ttl: Duration::from_millis(200),
        ..config(&dir)
    });
    let upstream = SlowUpstream::new(Duration::ZERO, None);
    cache.set_upstream(upstream.clone());

    assert!(cache.get("zzzzz").await.is_none());
    assert_eq!(upstream.calls(), 1);

    for _ in 0..99 {
        assert!(cache.get("zzzzz").await.is_none());
    }
    assert_eq!(upstream.calls(), 1, "negative entry short-circuits upstream");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(cache.get("zzzzz").await.is_none());
    assert_eq!(upstream.calls(), 2, "expired negative re-issues the fetch");
    cache.stop().await;
}

// =============================================================================
// Scenario 3: atomic replace with backup
// =============================================================================

#[tokio::test]
async fn replace_keeps_backup_until_cleanup_ages_it_out() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    let old = Asset::new("replme", Bytes::from_static(b"old-version"));
    let mut new = old.clone();
    new.data = Bytes::from_static(b"new-version");

    cache.cache(old, false);
    cache.flush().await;
    cache.cache(new, true);
    cache.flush().await;

    // Target holds the new bytes; the backup sibling holds the old bytes,
    // as after a crash between rename and backup removal.
    let path = file_path(&cache, "replme");
    let bak = path.with_file_name(format!(
        "{}.bak",
        path.file_name().unwrap().to_string_lossy()
    ));
    let target_bytes = std::fs::read(&path).unwrap();
    let bak_bytes = std::fs::read(&bak).unwrap();
    assert!(target_bytes.windows(11).any(|w| w == b"new-version"));
    assert!(bak_bytes.windows(11).any(|w| w == b"old-version"));

    // Cleanup removes backups older than bak_max_age (default 24h).
    age_file(&bak, Duration::from_secs(25 * 3600));
    let summary = cache
        .run_cleanup(SystemTime::now() - cache.config().file_ttl)
        .await
        .unwrap();
    assert_eq!(summary.baks_removed, 1);
    assert!(!bak.exists());
    assert!(path.exists(), "live file untouched");
    cache.stop().await;
}

// =============================================================================
// Scenario 4: cleanup spares scene-referenced assets
// =============================================================================

#[tokio::test]
async fn cleanup_spares_referenced_files() {
    let dir = TempDir::new().unwrap();
    let cache = AssetCache::new(config(&dir));

    // Fixed UUIDs with distinct shard prefixes.
    let u1 = Uuid::parse_str("11111111-1111-4111-8111-111111111111").unwrap();
    let u2 = Uuid::parse_str("22222222-2222-4222-8222-222222222222").unwrap();
    let u3 = Uuid::parse_str("33333333-3333-4333-8333-333333333333").unwrap();

    let region = Uuid::new_v4();
    cache.attach_scene(Arc::new(StubScene {
        region,
        referenced: vec![u1, u2],
    }));

    for uuid in [u1, u2, u3] {
        cache.cache(Asset::with_uuid(uuid, Bytes::from_static(b"terrain")), false);
    }
    cache.flush().await;

    let file_ttl = cache.config().file_ttl;
    for uuid in [u1, u2, u3] {
        age_file(&file_path(&cache, &uuid.to_string()), 2 * file_ttl);
    }

    let summary = cache
        .run_cleanup(SystemTime::now() - file_ttl)
        .await
        .unwrap();
    assert_eq!(summary.files_removed, 1, "only the unreferenced file goes");

    assert!(file_path(&cache, &u1.to_string()).exists());
    assert!(file_path(&cache, &u2.to_string()).exists());
    let gone = file_path(&cache, &u3.to_string());
    assert!(!gone.exists());
    assert!(
        !gone.parent().unwrap().exists(),
        "emptied shard directory removed"
    );
    // last detach shuts the cache down
    cache.detach_scene(region).await;
}

// =============================================================================
// Scenario 5: corrupted file self-heal
// =============================================================================

#[tokio::test]
async fn corrupted_file_heals_on_next_cache() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    let path = file_path(&cache, "corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut garbage = 0xDEAD_BEEFu32.to_le_bytes().to_vec();
    garbage.extend_from_slice(&[0u8; 32]);
    std::fs::write(&path, garbage).unwrap();

    // Miss, not a panic or error; the bad file is deleted.
    assert!(cache.get("corrupt").await.is_none());
    assert!(!path.exists());

    // A later insert persists cleanly and round-trips.
    cache.cache(Asset::new("corrupt", Bytes::from_static(b"healed")), false);
    cache.flush().await;
    cache.clear_memory();
    let healed = cache.get("corrupt").await.unwrap();
    assert_eq!(healed.data.as_ref(), b"healed");
    cache.stop().await;
}

// =============================================================================
// Scenario 6: file-write contention
// =============================================================================

#[tokio::test]
async fn overlapping_submissions_yield_one_write() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    let first = Asset::new("contend", Bytes::from_static(b"first-submission"));
    let mut second = first.clone();
    second.data = Bytes::from_static(b"second-submission");

    // Back-to-back submissions for the same ID: the second is either
    // dropped by the reservation or skipped by the exists fast path.
    cache.cache(first, false);
    cache.cache(second, false);
    cache.flush().await;

    cache.clear_memory();
    let read = cache.get("contend").await.unwrap();
    assert_eq!(read.data.as_ref(), b"first-submission");
    cache.stop().await;
}

// =============================================================================
// Tier interplay and boundaries
// =============================================================================

#[tokio::test]
async fn weak_tier_serves_assets_still_held_by_callers() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    cache.cache(Asset::new("held12", Bytes::from_static(b"x")), false);
    cache.flush().await;

    // Held by this test, so the weak handle stays live even after the
    // file tier is wiped.
    let held = cache.get("held12").await.unwrap();
    cache.clear_file().await;

    let again = cache.get("held12").await.unwrap();
    assert!(Arc::ptr_eq(&held, &again), "weak tier returned the same allocation");

    // Dropping every strong handle turns the weak entry into a miss.
    drop(held);
    drop(again);
    assert!(cache.get("held12").await.is_none());
    cache.stop().await;
}

#[tokio::test]
async fn zero_length_asset_round_trips_through_file_tier() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    let asset = Asset::new("void99", Bytes::new());
    let expected = asset.clone();
    cache.cache(asset, false);
    cache.flush().await;
    cache.clear_memory();

    let read = cache.get("void99").await.unwrap();
    assert_eq!(*read, expected);
    cache.stop().await;
}

#[tokio::test]
async fn shard_geometry_extremes_round_trip() {
    for (tiers, tier_len) in [(3u32, 4u32), (1, 1)] {
        let dir = TempDir::new().unwrap();
        let cache = started(CacheConfig {
            tiers,
            tier_len,
            ..config(&dir)
        });

        let id = format!("geometry-{tiers}-{tier_len}");
        cache.cache(Asset::new(&id, Bytes::from_static(b"sharded")), false);
        cache.flush().await;
        cache.clear_memory();

        let read = cache.get(&id).await.unwrap();
        assert_eq!(read.data.as_ref(), b"sharded");
        cache.stop().await;
    }
}

#[tokio::test]
async fn hostile_id_round_trips() {
    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));

    let hostile = r#"a/b\c:d*e?f"g<h>i|j"#;
    cache.cache(Asset::new(hostile, Bytes::from_static(b"survives")), false);
    cache.flush().await;
    cache.clear_memory();

    let read = cache.get(hostile).await.unwrap();
    assert_eq!(read.data.as_ref(), b"survives");
    cache.stop().await;
}

#[tokio::test]
async fn upstream_error_is_not_recorded_as_negative() {
    struct FailingUpstream {
        calls: AtomicU64,
        instance: Uuid,
    }

    #[async_trait]
    impl AssetUpstream for FailingUpstream {
        async fn fetch(&self, _id: &str) -> Result<Option<Asset>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(strata::CacheError::Upstream("flaky".into()))
        }
        fn instance_id(&self) -> Uuid {
            self.instance
        }
    }

    let dir = TempDir::new().unwrap();
    let cache = started(config(&dir));
    let upstream = Arc::new(FailingUpstream {
        calls: AtomicU64::new(0),
        instance: Uuid::new_v4(),
    });
    cache.set_upstream(upstream.clone());

    assert!(cache.get("flaky1").await.is_none());
    assert!(cache.get("flaky1").await.is_none());
    // a negative would have capped this at one call
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    cache.stop().await;
}

#[tokio::test]
async fn caches_can_chain_as_upstreams() {
    let shared_dir = TempDir::new().unwrap();
    let local_dir = TempDir::new().unwrap();

    let shared = started(config(&shared_dir));
    shared.set_upstream(InMemoryUpstream::with_assets([Asset::new(
        "chained",
        Bytes::from_static(b"from-origin"),
    )]));

    let local = started(config(&local_dir));
    local.set_upstream(Arc::new(shared.clone()));

    let asset = local.get("chained").await.unwrap();
    assert_eq!(asset.data.as_ref(), b"from-origin");
    // both layers now hold it
    assert!(local.check("chained").await);
    assert!(shared.check("chained").await);

    local.stop().await;
    shared.stop().await;
}
