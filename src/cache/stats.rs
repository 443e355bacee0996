//! Cache Counters & Status Reports
//!
//! Request/hit counters updated without locking; small lost updates are
//! acceptable. A [`StatusReport`] is a point-in-time snapshot assembled by
//! the control surface for the `status` verb.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lock-free request and hit counters
#[derive(Debug, Default)]
pub struct CacheStats {
    requests: AtomicU64,
    weak_hits: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request and return the running total
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_weak_hit(&self) {
        self.weak_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn weak_hits(&self) -> u64 {
        self.weak_hits.load(Ordering::Relaxed)
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn total_hits(&self) -> u64 {
        self.weak_hits() + self.memory_hits() + self.disk_hits()
    }

    /// Overall hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let requests = self.requests() as f64;
        if requests == 0.0 {
            0.0
        } else {
            self.total_hits() as f64 / requests
        }
    }
}

/// One region's most recent deep-scan timestamp
#[derive(Debug, Clone, Serialize)]
pub struct RegionScan {
    pub region: Uuid,
    pub scanned_at: DateTime<Utc>,
}

/// Point-in-time cache status, as reported by the `status` verb.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub requests: u64,
    pub weak_hits: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub total_hits: u64,
    /// Overall hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Followers that joined an in-flight upstream fetch
    pub inflight_joins: u64,
    /// Weak map entries, live or dangling
    pub weak_entries: usize,
    /// Entries examined for the liveness estimate
    pub weak_sampled: usize,
    /// Estimated live weak entries, scaled from the sample
    pub weak_live_estimate: usize,
    pub memory_entries: usize,
    pub negative_entries: usize,
    pub region_scans: Vec<RegionScan>,
}

impl StatusReport {
    /// Scale a `(sampled, live)` pair up to the full map.
    pub fn estimate_live(total: usize, sampled: usize, live: usize) -> usize {
        if sampled == 0 {
            return 0;
        }
        ((live as f64 / sampled as f64) * total as f64).round() as usize
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "requests={} hits={} ({:.1}%) [weak={} memory={} file={}]",
            self.requests,
            self.total_hits,
            self.hit_ratio * 100.0,
            self.weak_hits,
            self.memory_hits,
            self.disk_hits,
        )?;
        writeln!(
            f,
            "inflight joins={} weak entries={} (~{} live of {} sampled)",
            self.inflight_joins, self.weak_entries, self.weak_live_estimate, self.weak_sampled,
        )?;
        writeln!(
            f,
            "memory entries={} negative entries={}",
            self.memory_entries, self.negative_entries,
        )?;
        for scan in &self.region_scans {
            writeln!(
                f,
                "region {} deep-scanned at {}",
                scan.region,
                scan.scanned_at.to_rfc3339()
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
