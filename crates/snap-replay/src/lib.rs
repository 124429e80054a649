// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-sender `(from, id)` replay deduplication, per `spec.md` §4.5.
//!
//! The hot path is [`ReplayStore::has_seen`]; the reference implementation
//! keeps expiry lazy — evicted on access rather than swept by a background
//! task — and drops a sender's sub-map entirely once it empties out, so a
//! long-lived agent does not accumulate empty `HashMap`s for senders it has
//! not heard from in a while.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default replay tracking window, per `spec.md` §4.5.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
/// The protocol's minimum required tracking window (`id` uniqueness is only
/// guaranteed for 120s, per `spec.md` §3).
pub const MIN_WINDOW: Duration = Duration::from_secs(120);

/// Contract for tracking which `(from, id)` pairs have already been seen.
///
/// Implementations must be safe to share across concurrent handler
/// invocations; per-key atomicity is sufficient (no multi-key transaction
/// requirement, per `spec.md` §5).
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Whether `(from, id)` was marked seen within the tracking window and
    /// has not since expired.
    async fn has_seen(&self, from: &str, id: &str) -> bool;

    /// Record that `(from, id)` has been seen, using the store's own clock
    /// (not the message's `timestamp`) to compute future expiry. Per
    /// `spec.md` §9, this is a deliberate choice: the replay store is
    /// hardening against message replay observed "now", not asserting
    /// anything about when the message claims to have been sent.
    async fn mark_seen(&self, from: &str, id: &str);
}

/// Reference in-memory [`ReplayStore`].
///
/// Maintains `from -> (id -> insertion_time)`. A window of
/// [`Duration::ZERO`] disables expiry entirely (entries are remembered
/// forever).
pub struct InMemoryReplayStore {
    window: Duration,
    inner: Mutex<HashMap<String, HashMap<String, Instant>>>,
}

impl InMemoryReplayStore {
    /// Create a store with the given tracking window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// The number of distinct senders currently tracked. Exposed for tests
    /// and diagnostics — asserts the "sub-map clears when emptied" property.
    pub async fn sender_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for InMemoryReplayStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn has_seen(&self, from: &str, id: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let Some(by_id) = guard.get_mut(from) else {
            return false;
        };
        if !self.window.is_zero() {
            by_id.retain(|_, inserted_at| now.saturating_duration_since(*inserted_at) < self.window);
        }
        let seen = by_id.contains_key(id);
        if by_id.is_empty() {
            trace!(target: "snap_replay", %from, "sender sub-map emptied, dropping");
            guard.remove(from);
        }
        seen
    }

    async fn mark_seen(&self, from: &str, id: &str) {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        guard
            .entry(from.to_string())
            .or_default()
            .insert(id.to_string(), now);
    }
}
