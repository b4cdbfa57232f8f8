//! Metrics-recursion guard (spec.md §4.8.1).
//!
//! A process-wide reentrancy counter, incremented on entry to any
//! metrics-write path. The repository consults it before triggering a
//! checkpoint or emitting further metric entities: `metrics_depth > 0`
//! means this call originated from a metrics write, and must not recurse
//! into another round of metrics-about-the-write. Also engaged for any
//! entity id matching the metrics namespace convention, independent of
//! depth.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Entity ids in this namespace are always treated as metrics ops, even
/// at depth zero (e.g. a direct `Get` of a metrics entity by a dashboard
/// poll should not itself trigger a checkpoint).
pub const METRICS_NAMESPACE_PREFIX: &str = "metrics:";

pub fn is_metrics_entity_id(id: &str) -> bool {
    id.starts_with(METRICS_NAMESPACE_PREFIX)
}

#[derive(Clone, Default)]
pub struct MetricsRecursionGuard {
    depth: Arc<AtomicU32>,
}

impl MetricsRecursionGuard {
    pub fn new() -> Self {
        MetricsRecursionGuard::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// True while any metrics-write path is on the current call stack.
    pub fn is_metrics_op(&self) -> bool {
        self.depth() > 0
    }

    /// Enter a metrics-write scope; the returned guard decrements on
    /// drop, so the depth is correct even if the scope unwinds via `?`.
    pub fn enter(&self) -> MetricsScope {
        self.depth.fetch_add(1, Ordering::SeqCst);
        MetricsScope {
            depth: Arc::clone(&self.depth),
        }
    }

    /// Whether a checkpoint may be triggered right now: never while a
    /// metrics write is in progress (breaks the
    /// metrics->write->checkpoint->metric-about-checkpoint loop, §4.8.1).
    pub fn may_checkpoint(&self) -> bool {
        !self.is_metrics_op()
    }
}

/// RAII scope marking "currently inside a metrics write".
pub struct MetricsScope {
    depth: Arc<AtomicU32>,
}

impl Drop for MetricsScope {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_tracks_nested_scopes() {
        let guard = MetricsRecursionGuard::new();
        assert!(!guard.is_metrics_op());
        {
            let _s1 = guard.enter();
            assert!(guard.is_metrics_op());
            {
                let _s2 = guard.enter();
                assert_eq!(guard.depth(), 2);
            }
            assert_eq!(guard.depth(), 1);
        }
        assert!(!guard.is_metrics_op());
    }

    #[test]
    fn may_checkpoint_false_inside_metrics_scope() {
        let guard = MetricsRecursionGuard::new();
        assert!(guard.may_checkpoint());
        let _scope = guard.enter();
        assert!(!guard.may_checkpoint());
    }

    #[test]
    fn metrics_namespace_detection() {
        assert!(is_metrics_entity_id("metrics:checkpoint-count"));
        assert!(!is_metrics_entity_id("doc-1"));
    }
}
