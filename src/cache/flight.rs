//! Single-Flight Coordinator
//!
//! Collapses concurrent misses for the same ID into one upstream call.
//! The first requester to install a token becomes the leader and performs
//! the fetch; everyone else finds the token and waits on its channel. The
//! published outcome distinguishes hit, authoritative absence, and
//! upstream failure so the core can apply the right caching rule to each.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::warn;

use crate::asset::Asset;
use crate::upstream::AssetUpstream;

/// Result of one upstream flight, shared by leader and followers.
#[derive(Clone)]
pub enum FlightOutcome {
    /// Upstream returned the asset
    Hit(Arc<Asset>),
    /// Upstream authoritatively reported the asset absent
    Absent,
    /// Upstream failed; nothing is recorded so the next request retries
    Failed,
}

type OutcomeRx = watch::Receiver<Option<FlightOutcome>>;

enum Role {
    Leader(watch::Sender<Option<FlightOutcome>>),
    Follower(OutcomeRx),
}

/// Per-ID in-flight token map
#[derive(Default)]
pub struct FlightMap {
    inflight: DashMap<String, OutcomeRx>,
    joins: AtomicU64,
}

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Followers that joined an existing token, for status reports
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    /// Tokens currently outstanding
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Fetch `id` from upstream, deduplicating concurrent calls.
    pub async fn fetch(&self, id: &str, upstream: &dyn AssetUpstream) -> FlightOutcome {
        // The entry guard must not be held across an await.
        let role = match self.inflight.entry(id.to_string()) {
            Entry::Occupied(occupied) => Role::Follower(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                let outcome = match upstream.fetch(id).await {
                    Ok(Some(asset)) => FlightOutcome::Hit(Arc::new(asset)),
                    Ok(None) => FlightOutcome::Absent,
                    Err(e) => {
                        warn!(id, error = %e, "upstream fetch failed");
                        FlightOutcome::Failed
                    }
                };
                // Publish before removing the token: stragglers that joined
                // in the gap still observe the result.
                let _ = tx.send(Some(outcome.clone()));
                self.inflight.remove(id);
                outcome
            }
            Role::Follower(mut rx) => {
                self.joins.fetch_add(1, Ordering::Relaxed);
                match rx.wait_for(|outcome| outcome.is_some()).await {
                    Ok(guard) => (*guard).clone().unwrap_or(FlightOutcome::Failed),
                    // Leader dropped without publishing (cancelled task)
                    Err(_) => FlightOutcome::Failed,
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
