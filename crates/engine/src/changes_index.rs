//! The global "changes since" auxiliary index (spec.md §4.7
//! `ChangesSince`): a lightweight structure keyed by time bucket, kept
//! separate from the per-entity [`entitydb_storage::Timeline`] so a scan
//! for "what changed after t" doesn't need to walk every entity's full
//! history.

use std::collections::{BTreeMap, HashSet};

use entitydb_core::{EntityId, Timestamp};
use parking_lot::RwLock;

/// Bucket width: one second. Coarse enough to keep the bucket map small,
/// fine enough that `changes_since` rarely has to re-scan more than a
/// handful of buckets for any reasonably recent `t`.
const BUCKET_NANOS: u64 = 1_000_000_000;

fn bucket_of(ts: Timestamp) -> u64 {
    ts.as_nanos() / BUCKET_NANOS
}

struct Inner {
    last_change: std::collections::HashMap<EntityId, Timestamp>,
    buckets: BTreeMap<u64, HashSet<EntityId>>,
}

/// Tracks the most recent change timestamp per entity, bucketed for
/// efficient range queries.
pub struct ChangesIndex {
    inner: RwLock<Inner>,
}

impl ChangesIndex {
    pub fn new() -> Self {
        ChangesIndex {
            inner: RwLock::new(Inner {
                last_change: std::collections::HashMap::new(),
                buckets: BTreeMap::new(),
            }),
        }
    }

    /// Record that `id` changed at `ts` (a PUT or a DELETE, per §4.2 —
    /// both are changes worth surfacing to a `ChangesSince` poller).
    pub fn record_change(&self, id: EntityId, ts: Timestamp) {
        let mut inner = self.inner.write();
        inner.buckets.entry(bucket_of(ts)).or_default().insert(id.clone());
        inner.last_change.insert(id, ts);
    }

    /// `(entity_id, last_change_ns)` pairs with `last_change_ns >= since`,
    /// scanning only buckets at or after `since`'s bucket.
    pub fn changes_since(&self, since: Timestamp) -> Vec<(EntityId, Timestamp)> {
        let inner = self.inner.read();
        let start_bucket = bucket_of(since);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (_, ids) in inner.buckets.range(start_bucket..) {
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(&last) = inner.last_change.get(id) {
                    if last >= since {
                        out.push((id.clone(), last));
                    }
                }
            }
        }
        out.sort_by_key(|(_, ts)| *ts);
        out
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.last_change.clear();
        inner.buckets.clear();
    }
}

impl Default for ChangesIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn returns_only_changes_at_or_after_since() {
        let idx = ChangesIndex::new();
        idx.record_change(id("a"), Timestamp::from_nanos(1 * BUCKET_NANOS));
        idx.record_change(id("b"), Timestamp::from_nanos(5 * BUCKET_NANOS));
        let changes = idx.changes_since(Timestamp::from_nanos(3 * BUCKET_NANOS));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, id("b"));
    }

    #[test]
    fn later_change_to_same_entity_updates_last_change() {
        let idx = ChangesIndex::new();
        idx.record_change(id("a"), Timestamp::from_nanos(1 * BUCKET_NANOS));
        idx.record_change(id("a"), Timestamp::from_nanos(10 * BUCKET_NANOS));
        let changes = idx.changes_since(Timestamp::from_nanos(2 * BUCKET_NANOS));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, Timestamp::from_nanos(10 * BUCKET_NANOS));
    }
}
