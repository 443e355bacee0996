//! Multi-Layer Asset Cache
//!
//! Resolves requests for immutable, content-addressed assets through a
//! cascade of tiers, with a deduplicated path to the upstream service on
//! a full miss.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        AssetCache (core)                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Weak map        │ Memory map      │ File tier      │ Negative   │
//! │ ┌─────────────┐ │ ┌─────────────┐ │ ┌────────────┐ │ ┌────────┐ │
//! │ │ Weak<Asset> │ │ │ Arc + TTL   │ │ │ sharded    │ │ │ id →   │ │
//! │ │ handles     │ │ │ (optional)  │ │ │ dirs +     │ │ │ expiry │ │
//! │ └─────────────┘ │ └─────────────┘ │ │ writer pool│ │ └────────┘ │
//! │                 │                 │ └────────────┘ │            │
//! │         └───────┴──── miss ───────┴────────┘       │            │
//! │                         │                          │            │
//! │              Single-flight coordinator ──────► upstream fetch   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lower-tier hits refresh the tiers above; concurrent misses for one ID
//! collapse into a single upstream call; writes ride a bounded queue to a
//! small worker pool that commits with temp-file-then-rename; a periodic
//! sweep prunes expired files while sparing scene-referenced assets.

pub mod cleanup;
pub mod codec;
pub mod config;
pub mod control;
pub mod core;
pub mod disk;
pub mod filename;
pub mod flight;
pub mod memory;
pub mod negative;
pub mod stats;
pub mod weak;
pub mod writer;

#[cfg(test)]
mod proptest;

pub use self::cleanup::CleanupSummary;
pub use self::codec::{CodecLimits, MAGIC, VERSION};
pub use self::config::CacheConfig;
pub use self::control::{ControlCommand, DeepTouchSummary};
pub use self::core::AssetCache;
pub use self::stats::{RegionScan, StatusReport};
pub use self::writer::QUEUE_CAPACITY;
