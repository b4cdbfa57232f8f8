//! Per-entity ordered timeline of tag events (spec.md §4.5.2).
//!
//! Backs `History`, `AsOf`, and `Diff` (§4.7): every tag event an entity
//! has ever received, in append order, with a secondary binary-search
//! index on timestamp for point-in-time lookups.

use entitydb_core::{TagValue, Timestamp};

/// One entity's append-ordered tag event log.
///
/// Events are kept sorted by `(timestamp, insertion order)` as they
/// arrive; since a writer only ever appends with a timestamp `>=` the
/// last one it wrote for a given entity, `push` is the common case and
/// O(1) amortized. Out-of-order inserts (not expected in normal
/// operation, but not assumed impossible) fall back to a binary-search
/// insertion point.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<TagValue>,
}

impl Timeline {
    pub fn new() -> Self {
        Timeline { events: Vec::new() }
    }

    pub fn from_sorted(events: Vec<TagValue>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Timeline { events }
    }

    /// Append one event, amortized O(1) on the common monotonic-timestamp
    /// path, O(n) worst case for an out-of-order arrival.
    pub fn push(&mut self, event: TagValue) {
        match self.events.last() {
            Some(last) if last.timestamp <= event.timestamp => self.events.push(event),
            _ => {
                let pos = self
                    .events
                    .partition_point(|e| e.timestamp <= event.timestamp);
                self.events.insert(pos, event);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn all(&self) -> &[TagValue] {
        &self.events
    }

    /// All events with `timestamp <= at`, in order — the raw material for
    /// `AsOf` derivation (§4.7.1), before namespace/insertion-order
    /// collapsing.
    pub fn events_up_to(&self, at: Timestamp) -> &[TagValue] {
        let end = self.events.partition_point(|e| e.timestamp <= at);
        &self.events[..end]
    }

    /// Events in the half-open range `[from, to)` (§4.7.2 `History`).
    pub fn events_in_range(&self, from: Timestamp, to: Timestamp) -> &[TagValue] {
        let start = self.events.partition_point(|e| e.timestamp < from);
        let end = self.events.partition_point(|e| e.timestamp < to);
        &self.events[start..end]
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.events.last().map(|e| e.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(ts: u64, v: &str) -> TagValue {
        TagValue::new(Timestamp::from_nanos(ts), v).unwrap()
    }

    #[test]
    fn push_keeps_monotonic_order() {
        let mut t = Timeline::new();
        t.push(tv(10, "status:active"));
        t.push(tv(20, "status:inactive"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.all()[0].timestamp, Timestamp::from_nanos(10));
    }

    #[test]
    fn out_of_order_push_inserts_correctly() {
        let mut t = Timeline::new();
        t.push(tv(20, "b"));
        t.push(tv(10, "a"));
        assert_eq!(t.all()[0].timestamp, Timestamp::from_nanos(10));
        assert_eq!(t.all()[1].timestamp, Timestamp::from_nanos(20));
    }

    #[test]
    fn events_up_to_is_inclusive() {
        let mut t = Timeline::new();
        t.push(tv(10, "a"));
        t.push(tv(20, "b"));
        t.push(tv(30, "c"));
        assert_eq!(t.events_up_to(Timestamp::from_nanos(20)).len(), 2);
    }

    #[test]
    fn events_in_range_is_half_open() {
        let mut t = Timeline::new();
        t.push(tv(10, "a"));
        t.push(tv(20, "b"));
        t.push(tv(30, "c"));
        let r = t.events_in_range(Timestamp::from_nanos(10), Timestamp::from_nanos(30));
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].timestamp, Timestamp::from_nanos(10));
        assert_eq!(r[1].timestamp, Timestamp::from_nanos(20));
    }
}
