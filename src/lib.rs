//! Strata - Concurrent Multi-Layer Asset Cache
//!
//! A caching layer that sits between a simulator host and an upstream
//! asset service, resolving immutable, content-addressed assets through a
//! cascade of tiers: a weak in-process reference map, an expiring
//! in-memory map, a tier-sharded on-disk store, and a bounded
//! negative-lookup map.
//!
//! # Guarantees
//!
//! - Concurrent requests for the same absent asset produce at most one
//!   upstream fetch (single-flight).
//! - At most one writer job runs per asset file at any instant; readers
//!   observe either the previous complete version or a miss, never a torn
//!   read.
//! - Failures never escape a public operation: every error maps to a miss
//!   or a `false` result, with logs as the only transient-failure channel.
//!
//! # Modules
//!
//! - [`asset`] - Asset record and identity validation
//! - [`cache`] - The layered cache: tiers, codec, write pipeline,
//!   single-flight coordinator, cleanup, and the control surface
//! - [`error`] - Error taxonomy
//! - [`scene`] - Scene and default-assets collaborator seams
//! - [`upstream`] - Upstream asset-service seam
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata::{AssetCache, CacheConfig, InMemoryUpstream};
//!
//! # async fn demo() {
//! let cache = AssetCache::new(CacheConfig::default());
//! cache.set_upstream(Arc::new(InMemoryUpstream::new()));
//! cache.start();
//!
//! if let Some(asset) = cache.get("0a1b2c").await {
//!     println!("{} bytes", asset.size());
//! }
//! # }
//! ```

pub mod asset;
pub mod cache;
pub mod error;
pub mod scene;
pub mod upstream;

// Re-export commonly used types
pub use asset::{Asset, AssetMetadata};
pub use cache::{
    AssetCache, CacheConfig, CleanupSummary, ControlCommand, DeepTouchSummary, StatusReport,
};
pub use error::{CacheError, Result};
pub use scene::{DefaultAssetLoader, ReferenceKind, SceneView};
pub use upstream::{AssetUpstream, InMemoryUpstream};
