//! Live deletion index (spec.md §4.5.4, §3.5): `entity_id -> {ts, state,
//! flags}`, consulted on every point read and list/query operation so
//! soft/archived/purged entities stay hidden without being physically
//! removed from the data region.

use std::collections::HashMap;

use entitydb_core::{EntityId, LifecycleState};
use parking_lot::RwLock;

/// One entity's deletion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionRecord {
    pub deletion_ts: entitydb_core::Timestamp,
    pub state: LifecycleState,
    pub flags: u8,
}

/// The live deletion index. A `Get`/`List`/`Query` consults this before
/// returning any entity; presence here means "hidden" regardless of what
/// the data region still holds for that id (P-DELETED-HIDDEN).
pub struct DeletionIndex {
    inner: RwLock<HashMap<EntityId, DeletionRecord>>,
}

impl DeletionIndex {
    pub fn new() -> Self {
        DeletionIndex {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn mark(
        &self,
        id: EntityId,
        deletion_ts: entitydb_core::Timestamp,
        state: LifecycleState,
        flags: u8,
    ) {
        self.inner.write().insert(
            id,
            DeletionRecord {
                deletion_ts,
                state,
                flags,
            },
        );
    }

    /// Reverse a soft/archived deletion (§3.5 restore), returning the
    /// record that was removed, if any.
    pub fn unmark(&self, id: &EntityId) -> Option<DeletionRecord> {
        self.inner.write().remove(id)
    }

    pub fn is_deleted(&self, id: &EntityId) -> bool {
        self.inner.read().contains_key(id)
    }

    pub fn record(&self, id: &EntityId) -> Option<DeletionRecord> {
        self.inner.read().get(id).copied()
    }

    /// Whether `id` is restorable: present and not yet `Purged` (§3.5 —
    /// purged entities are not recoverable).
    pub fn is_restorable(&self, id: &EntityId) -> bool {
        matches!(
            self.record(id),
            Some(DeletionRecord {
                state: LifecycleState::Soft | LifecycleState::Archived,
                ..
            })
        )
    }

    pub fn snapshot(&self) -> Vec<(EntityId, DeletionRecord)> {
        self.inner
            .read()
            .iter()
            .map(|(id, rec)| (id.clone(), *rec))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl Default for DeletionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::Timestamp;

    #[test]
    fn mark_and_check() {
        let idx = DeletionIndex::new();
        let id = EntityId::new("e1").unwrap();
        assert!(!idx.is_deleted(&id));
        idx.mark(id.clone(), Timestamp::from_nanos(10), LifecycleState::Soft, 0);
        assert!(idx.is_deleted(&id));
        assert!(idx.is_restorable(&id));
    }

    #[test]
    fn purged_is_not_restorable() {
        let idx = DeletionIndex::new();
        let id = EntityId::new("e1").unwrap();
        idx.mark(id.clone(), Timestamp::from_nanos(10), LifecycleState::Purged, 0);
        assert!(idx.is_deleted(&id));
        assert!(!idx.is_restorable(&id));
    }

    #[test]
    fn unmark_restores() {
        let idx = DeletionIndex::new();
        let id = EntityId::new("e1").unwrap();
        idx.mark(id.clone(), Timestamp::from_nanos(10), LifecycleState::Archived, 0);
        idx.unmark(&id);
        assert!(!idx.is_deleted(&id));
    }
}
