//! Dedup checkpoints: the bounded seen-id ledger behind "only announce new
//! items".
//!
//! A [`DedupCheckpoint`] remembers the identity tokens of items already
//! classified as new, in insertion order. Eviction uses insertion order
//! rather than published time, since published timestamps are
//! publisher-supplied and untrustworthy for ordering. [`diff`] and
//! [`DedupCheckpoint::seed`] are pure functions of their inputs, so
//! replaying the same feed snapshot always produces the same answer.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::feed::FeedItem;

/// Maximum ids retained per checkpoint. Must exceed any sensible
/// `init_fetch_count` so a checkpoint can grow past its seed baseline.
pub const RETENTION_CAP: usize = 500;

/// Bounded, insertion-ordered set of previously seen item identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupCheckpoint {
    // Front = oldest-inserted, back = newest. Small enough that linear
    // membership scans beat carrying a parallel hash set through serde.
    seen: VecDeque<String>,
}

impl DedupCheckpoint {
    /// Builds the baseline checkpoint for a fresh subscription.
    ///
    /// The `take` most recent items (document order, newest first) are
    /// recorded as already seen without ever being reported as new, so
    /// subscribing does not flood the channel with the feed's backlog.
    pub fn seed(items: &[FeedItem], take: usize) -> Self {
        let mut checkpoint = Self::default();
        for item in items.iter().take(take) {
            checkpoint.insert(&item.id);
        }
        checkpoint
    }

    /// Rebuilds a checkpoint from persisted ids, oldest-inserted first.
    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        let mut checkpoint = Self::default();
        for id in ids {
            if !id.is_empty() {
                checkpoint.insert(&id);
            }
        }
        checkpoint
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.iter().any(|seen| seen == id)
    }

    /// Records an id, evicting the oldest-inserted entries once the
    /// retention cap is exceeded. Inserting a known id is a no-op.
    fn insert(&mut self, id: &str) {
        if self.contains(id) {
            return;
        }
        self.seen.push_back(id.to_string());
        while self.seen.len() > RETENTION_CAP {
            self.seen.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Ids in insertion order, for persistence.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}

/// Result of diffing a parsed item sequence against a checkpoint.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Genuinely new items, ordered oldest-first for delivery.
    pub fresh: Vec<FeedItem>,
    /// The checkpoint with the new identities recorded.
    pub checkpoint: DedupCheckpoint,
}

/// Computes which items are new relative to `checkpoint`.
///
/// An item is new iff its identity token is absent from the checkpoint.
/// Feeds list newest entries first, so the new subset is reversed into
/// oldest-first order for delivery. Idempotent: diffing the returned
/// checkpoint against the same items yields nothing.
pub fn diff(checkpoint: &DedupCheckpoint, items: &[FeedItem]) -> DiffOutcome {
    let mut updated = checkpoint.clone();
    let mut fresh = Vec::new();

    for item in items {
        if !updated.contains(&item.id) {
            updated.insert(&item.id);
            fresh.push(item.clone());
        }
    }

    fresh.reverse();
    DiffOutcome {
        fresh,
        checkpoint: updated,
    }
}

// ============================================================================
// Tests
// ============================================================================
