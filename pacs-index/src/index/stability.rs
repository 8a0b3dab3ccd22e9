//! Stability tracker: a bounded LRU of recently-touched
//! patient/study/series resources.
//!
//! A tracked resource is unstable; expiry of the quiescence window or
//! eviction by capacity promotes it to stable, which emits a
//! `Stable*` change. The state machine per resource is
//! `absent → unstable → stable`, with any write-side touch resetting
//! the timer and deletion dropping the entry.

use std::num::NonZeroUsize;

use lru::LruCache;
use pacs_core::types::enums::ResourceKind;
use pacs_core::types::identifiers::ResourceId;

/// Tracker entry value.
#[derive(Debug, Clone)]
pub(crate) struct UnstablePayload {
    pub kind: ResourceKind,
    pub public_id: String,
    pub first_touch: i64,
    pub last_touch: i64,
}

pub(crate) struct StabilityTracker {
    entries: LruCache<i64, UnstablePayload>,
}

impl StabilityTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Record a write-side touch. Returns the entry evicted by
    /// capacity, if any; the caller must promote it immediately.
    pub fn mark_unstable(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        public_id: &str,
        now: i64,
    ) -> Option<(ResourceId, UnstablePayload)> {
        let first_touch = self
            .entries
            .peek(&id.0)
            .map(|existing| existing.first_touch)
            .unwrap_or(now);
        let payload = UnstablePayload {
            kind,
            public_id: public_id.to_string(),
            first_touch,
            last_touch: now,
        };
        match self.entries.push(id.0, payload) {
            // Re-touch of an already-tracked resource.
            Some((evicted_id, _)) if evicted_id == id.0 => None,
            Some((evicted_id, payload)) => Some((ResourceId(evicted_id), payload)),
            None => None,
        }
    }

    /// Forget a resource (deleted, or promoted externally).
    pub fn remove(&mut self, id: ResourceId) {
        self.entries.pop(&id.0);
    }

    /// Re-insert an entry whose promotion failed, keeping its
    /// timestamps, so the monitor retries later.
    pub fn restore(&mut self, id: ResourceId, payload: UnstablePayload) {
        self.entries.push(id.0, payload);
    }

    /// Remove and return every entry quiescent for at least `window`
    /// seconds, least-recently-touched first.
    pub fn take_quiescent(
        &mut self,
        now: i64,
        window: u64,
    ) -> Vec<(ResourceId, UnstablePayload)> {
        let mut due = Vec::new();
        loop {
            let expired = match self.entries.peek_lru() {
                Some((_, payload)) => now.saturating_sub(payload.last_touch) >= window as i64,
                None => break,
            };
            if !expired {
                break;
            }
            if let Some((id, payload)) = self.entries.pop_lru() {
                due.push((ResourceId(id), payload));
            }
        }
        due
    }

    /// Seconds until the oldest entry becomes quiescent; `None` when
    /// the tracker is empty.
    pub fn seconds_until_next(&self, now: i64, window: u64) -> Option<u64> {
        self.entries.peek_lru().map(|(_, payload)| {
            let due_at = payload.last_touch + window as i64;
            due_at.saturating_sub(now).max(0) as u64
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains(&id.0)
    }
}
