//! The 256-shard tag→entity-id index (spec.md §4.5.1).
//!
//! Each shard owns its own `RwLock`; a caller holding the repository's read
//! lock still takes per-shard locks independently, so lookups across
//! different shards proceed concurrently (§5 locking hierarchy, level 3).

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use entitydb_core::EntityId;
use parking_lot::RwLock;
use rustc_hash::FxHasher;

/// Number of shards the tag index is partitioned into (§4.5.1).
pub const SHARD_COUNT: usize = 256;

/// Deterministic 64-bit hash of a tag value, used both for shard
/// selection and as the `tag_hash64` stored in the on-disk tag-index
/// region (§4.1.4).
pub fn hash64(value: &str) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

fn shard_index(value: &str) -> usize {
    (hash64(value) % SHARD_COUNT as u64) as usize
}

/// One shard: a set of entity ids per distinct tag value.
type Shard = RwLock<HashMap<String, HashSet<EntityId>>>;

/// The live, queryable tag index: 256 independently-locked shards mapping
/// a tag value to the set of entity ids currently carrying it.
///
/// This index reflects *current* state only (the set of tags each live
/// entity's most recent snapshot carries) — it is not the history; that is
/// [`crate::index::Timeline`]'s job. Deleting an entity removes it from
/// this index (so `Query` no longer matches it) while its timeline is left
/// untouched, which is what lets `History` keep returning pre-deletion
/// events after a delete (P-DELETED-HIDDEN).
pub struct ShardedTagIndex {
    shards: Vec<Shard>,
}

impl ShardedTagIndex {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(HashMap::new()));
        }
        ShardedTagIndex { shards }
    }

    /// Record that `entity_id` currently carries `tag_value`.
    pub fn insert(&self, tag_value: &str, entity_id: EntityId) {
        let shard = &self.shards[shard_index(tag_value)];
        shard
            .write()
            .entry(tag_value.to_string())
            .or_default()
            .insert(entity_id);
    }

    /// Record that `entity_id` no longer carries `tag_value`. Drops the
    /// tag-value bucket entirely once its set is empty.
    pub fn remove(&self, tag_value: &str, entity_id: &EntityId) {
        let shard = &self.shards[shard_index(tag_value)];
        let mut guard = shard.write();
        if let Some(set) = guard.get_mut(tag_value) {
            set.remove(entity_id);
            if set.is_empty() {
                guard.remove(tag_value);
            }
        }
    }

    /// Remove every live tag-value association for `entity_id`, given the
    /// full set of tag values it currently carries (the writer passes the
    /// entity's derived current tag set here, §4.2 step 4).
    pub fn remove_entity(&self, current_tags: &[String], entity_id: &EntityId) {
        for tag_value in current_tags {
            self.remove(tag_value, entity_id);
        }
    }

    /// All entity ids currently carrying an exact tag value.
    pub fn entities_for(&self, tag_value: &str) -> HashSet<EntityId> {
        let shard = &self.shards[shard_index(tag_value)];
        shard.read().get(tag_value).cloned().unwrap_or_default()
    }

    /// All entity ids whose tag value starts with `prefix` (used for
    /// wildcard predicates like `ns:*`, §4.6 `Query`). This necessarily
    /// scans every shard since the wildcard can hash to any of them.
    pub fn entities_for_prefix(&self, prefix: &str) -> HashSet<EntityId> {
        let mut out = HashSet::new();
        for shard in &self.shards {
            let guard = shard.read();
            for (tag_value, ids) in guard.iter() {
                if tag_value.starts_with(prefix) {
                    out.extend(ids.iter().cloned());
                }
            }
        }
        out
    }

    /// Size of the set behind `tag_value`, used to order AND-intersections
    /// by ascending set size before folding (§4.6 multi-tag AND).
    pub fn set_size(&self, tag_value: &str) -> usize {
        let shard = &self.shards[shard_index(tag_value)];
        shard.read().get(tag_value).map(|s| s.len()).unwrap_or(0)
    }

    /// Take a consistent (per-shard) snapshot for rebuild-equality testing
    /// (P-REBUILD); iterates all 256 shards under their own read locks.
    pub fn snapshot(&self) -> Vec<(String, HashSet<EntityId>)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            for (k, v) in guard.iter() {
                out.push((k.clone(), v.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

impl Default for ShardedTagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let idx = ShardedTagIndex::new();
        let e1 = EntityId::new("e1").unwrap();
        let e2 = EntityId::new("e2").unwrap();
        idx.insert("status:active", e1.clone());
        idx.insert("status:active", e2.clone());
        let set = idx.entities_for("status:active");
        assert_eq!(set.len(), 2);
        assert!(set.contains(&e1));
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let idx = ShardedTagIndex::new();
        let e1 = EntityId::new("e1").unwrap();
        idx.insert("status:active", e1.clone());
        idx.remove("status:active", &e1);
        assert_eq!(idx.set_size("status:active"), 0);
    }

    #[test]
    fn prefix_scan() {
        let idx = ShardedTagIndex::new();
        let e1 = EntityId::new("e1").unwrap();
        idx.insert("ns:a", e1.clone());
        idx.insert("ns:b", e1.clone());
        idx.insert("other:x", e1.clone());
        let hits = idx.entities_for_prefix("ns:");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash64("status:active"), hash64("status:active"));
    }
}
