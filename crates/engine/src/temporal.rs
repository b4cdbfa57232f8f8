//! Temporal query algorithms (spec.md §4.7): `AsOf`, `History`, `Diff`, and
//! `ChangesSince`, all operating on a [`Timeline`] (or, for the last one,
//! the lightweight [`crate::changes_index::ChangesIndex`]).

use std::collections::HashMap;

use entitydb_core::{EntityId, TagValue, Timestamp};
use entitydb_storage::Timeline;

use crate::changes_index::ChangesIndex;

/// The tag-set active at or before `t`, one entry per namespace, ties
/// resolved by append order (§4.7 `AsOf`). Delegates to the timeline's
/// `events_up_to` plus the same per-namespace reduction `Entity::tag_set_as_of`
/// performs, so a freshly-loaded `Entity` and a live `Timeline` agree
/// (P-ASOF-IDEMPOTENT: calling this twice at the same `t` is side-effect
/// free and returns the same set).
pub fn as_of(timeline: &Timeline, t: Timestamp) -> Vec<TagValue> {
    let mut latest: Vec<TagValue> = Vec::new();
    for tag in timeline.events_up_to(t) {
        if let Some(slot) = latest
            .iter_mut()
            .find(|existing| existing.namespace() == tag.namespace())
        {
            if tag.timestamp >= slot.timestamp {
                *slot = tag.clone();
            }
        } else {
            latest.push(tag.clone());
        }
    }
    latest
}

/// Every tag event in the half-open range `[from, to)` (§4.7 `History`).
pub fn history(timeline: &Timeline, from: Timestamp, to: Timestamp) -> Vec<TagValue> {
    timeline.events_in_range(from, to).into_iter().cloned().collect()
}

/// What changed between two points in time: tags present in `as_of(t2)`
/// but not `as_of(t1)` (`added`), present in both but with a different
/// timestamp (`changed`), and present in `as_of(t1)` but absent from
/// `as_of(t2)` (`removed`) (§4.7 `Diff`).
///
/// P-DIFF-SYM: `diff(timeline, t1, t2)` and `diff(timeline, t2, t1)` are
/// mirror images of each other (swap `added`/`removed`, `changed` keeps the
/// same member set).
pub struct DiffResult {
    pub added: Vec<TagValue>,
    pub changed: Vec<TagValue>,
    pub removed: Vec<TagValue>,
}

pub fn diff(timeline: &Timeline, t1: Timestamp, t2: Timestamp) -> DiffResult {
    let before_set = as_of(timeline, t1);
    let after_set = as_of(timeline, t2);

    let before_by_ns: HashMap<&str, &TagValue> =
        before_set.iter().map(|t| (t.namespace(), t)).collect();
    let after_by_ns: HashMap<&str, &TagValue> = after_set.iter().map(|t| (t.namespace(), t)).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    let mut removed = Vec::new();

    for (ns, tag) in &after_by_ns {
        match before_by_ns.get(ns) {
            None => added.push((*tag).clone()),
            Some(prev) if prev.value != tag.value => changed.push((*tag).clone()),
            Some(_) => {}
        }
    }
    for (ns, tag) in &before_by_ns {
        if !after_by_ns.contains_key(ns) {
            removed.push((*tag).clone());
        }
    }

    DiffResult { added, changed, removed }
}

/// Entities that changed at or after `since`, ordered by change time
/// (§4.7 `ChangesSince`).
pub fn changes_since(index: &ChangesIndex, since: Timestamp) -> Vec<(EntityId, Timestamp)> {
    index.changes_since(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(ts: u64, v: &str) -> TagValue {
        TagValue::new(Timestamp::from_nanos(ts), v).unwrap()
    }

    #[test]
    fn as_of_picks_latest_per_namespace() {
        let timeline = Timeline::from_sorted(vec![
            tv(10, "status:draft"),
            tv(20, "status:published"),
            tv(15, "owner:alice"),
        ]);
        let set = as_of(&timeline, Timestamp::from_nanos(20));
        assert_eq!(set.len(), 2);
        assert!(set.iter().any(|t| t.value == "status:published"));
        assert!(set.iter().any(|t| t.value == "owner:alice"));
    }

    #[test]
    fn as_of_is_idempotent() {
        let timeline = Timeline::from_sorted(vec![tv(10, "status:draft"), tv(20, "status:published")]);
        let a = as_of(&timeline, Timestamp::from_nanos(15));
        let b = as_of(&timeline, Timestamp::from_nanos(15));
        assert_eq!(a, b);
    }

    #[test]
    fn history_is_half_open() {
        let timeline = Timeline::from_sorted(vec![tv(10, "a:1"), tv(20, "a:2"), tv(30, "a:3")]);
        let events = history(&timeline, Timestamp::from_nanos(10), Timestamp::from_nanos(30));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, "a:1");
        assert_eq!(events[1].value, "a:2");
    }

    #[test]
    fn diff_reports_added_changed_removed() {
        let timeline = Timeline::from_sorted(vec![
            tv(10, "status:draft"),
            tv(20, "owner:alice"),
            tv(30, "status:published"),
        ]);
        let d = diff(&timeline, Timestamp::from_nanos(15), Timestamp::from_nanos(30));
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].value, "status:published");
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].value, "owner:alice");
        assert!(d.removed.is_empty());
    }
}
