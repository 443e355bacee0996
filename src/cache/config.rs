//! Cache Configuration
//!
//! One struct holding every recognized option, with the defaults and clamp
//! ranges applied by [`CacheConfig::clamped`]. The host constructs this in
//! code; parsing a configuration file is the host's concern.

use std::path::PathBuf;
use std::time::Duration;

/// Per-path debounce window for access-time touches
pub const TOUCH_DEBOUNCE: Duration = Duration::from_secs(15 * 60);

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Enable the on-disk tier and its writer workers
    pub file_enabled: bool,
    /// Base directory for the on-disk tier
    pub cache_root: PathBuf,
    /// Enable the expiring memory tier
    pub memory_enabled: bool,
    /// Time-to-live for memory tier entries
    pub memory_ttl: Duration,
    /// Enable the negative (known-absent) map
    pub negative_enabled: bool,
    /// Time-to-live for negative entries
    pub negative_ttl: Duration,
    /// Touch file last-access time on cache hits (debounced)
    pub touch_on_hit: bool,
    /// Files with last-access older than this are purged by cleanup
    pub file_ttl: Duration,
    /// Period of the background cleanup timer (None disables the timer)
    pub cleanup_period: Option<Duration>,
    /// Shard directory depth, clamped to `[1, 3]`
    pub tiers: u32,
    /// Shard directory name length, clamped to `[1, 4]`
    pub tier_len: u32,
    /// Per-directory entry count that triggers an operator warning
    pub cache_warn_at: usize,
    /// Upper bound on negative map size, lower bound 1000
    pub negative_max_entries: usize,
    /// Entries removed per prune pass, lower bound 100
    pub negative_prune_batch: usize,
    /// Codec cap on each string field, clamped to `[32 KiB, 2 MiB]`
    pub max_string_bytes: usize,
    /// Codec cap on the data field, clamped to `[8 MiB, 512 MiB]`
    pub max_data_bytes: usize,
    /// Read retries while a write reservation is held, clamped to `[0, 10]`
    pub backoff_attempts: u32,
    /// Initial retry delay, clamped to `[0, 500] ms`
    pub backoff_initial: Duration,
    /// Retry delay ceiling, clamped to `[initial, 2000] ms`
    pub backoff_max: Duration,
    /// Delete stale `.bak` siblings during cleanup
    pub bak_cleanup_enabled: bool,
    /// Age past which a `.bak` file is stale, clamped to `[1, 168]` hours
    pub bak_max_age: Duration,
    /// Writer worker pool size, clamped to `[1, 4]`
    pub writer_workers: usize,
    /// Emit a hit-rate debug log every this many requests (0 disables)
    pub hit_rate_display: u64,
    /// Weak map liveness sample size for status reports, lower bound 100
    pub weak_sample_target: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            cache_root: PathBuf::from("c_assetcache"),
            memory_enabled: false,
            // 0.016 hours
            memory_ttl: Duration::from_secs_f64(0.016 * 3600.0),
            negative_enabled: true,
            negative_ttl: Duration::from_secs(120),
            touch_on_hit: false,
            file_ttl: Duration::from_secs(48 * 3600),
            cleanup_period: Some(Duration::from_secs(3600)),
            tiers: 1,
            tier_len: 3,
            cache_warn_at: 30_000,
            negative_max_entries: 100_000,
            negative_prune_batch: 5_000,
            max_string_bytes: 256 * 1024,
            max_data_bytes: 64 * 1024 * 1024,
            backoff_attempts: 3,
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(40),
            bak_cleanup_enabled: true,
            bak_max_age: Duration::from_secs(24 * 3600),
            writer_workers: 1,
            hit_rate_display: 100,
            weak_sample_target: 2_000,
        }
    }
}

impl CacheConfig {
    /// Apply every documented clamp and return the normalized config.
    ///
    /// Called once when the cache is constructed, so the rest of the code
    /// can rely on in-range values.
    pub fn clamped(mut self) -> Self {
        self.tiers = self.tiers.clamp(1, 3);
        self.tier_len = self.tier_len.clamp(1, 4);
        self.negative_max_entries = self.negative_max_entries.max(1_000);
        self.negative_prune_batch = self.negative_prune_batch.max(100);
        self.max_string_bytes = self.max_string_bytes.clamp(32 * 1024, 2 * 1024 * 1024);
        self.max_data_bytes = self
            .max_data_bytes
            .clamp(8 * 1024 * 1024, 512 * 1024 * 1024);
        self.backoff_attempts = self.backoff_attempts.min(10);
        self.backoff_initial = self.backoff_initial.min(Duration::from_millis(500));
        self.backoff_max = self
            .backoff_max
            .clamp(self.backoff_initial, Duration::from_millis(2000));
        self.bak_max_age = self.bak_max_age.clamp(
            Duration::from_secs(3600),
            Duration::from_secs(168 * 3600),
        );
        self.writer_workers = self.writer_workers.clamp(1, 4);
        self.weak_sample_target = self.weak_sample_target.max(100);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
