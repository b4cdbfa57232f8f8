//! Conservative background metrics-retention scheduling (spec.md §4.8.3).
//!
//! Design intent: retention sweeps never contend with foreground
//! latency paths. The scheduler only becomes eligible to run after a
//! startup grace period, runs on long intervals, and every operation it
//! issues carries its own short timeout; it short-circuits entirely if
//! the metrics-recursion guard says a metrics op is already in flight.

use std::time::{Duration, Instant};

use crate::metrics_guard::MetricsRecursionGuard;

#[derive(Debug, Clone, Copy)]
pub struct RetentionScheduleConfig {
    pub startup_grace: Duration,
    pub interval: Duration,
    pub list_timeout: Duration,
    pub lookup_timeout: Duration,
    pub create_timeout: Duration,
}

impl Default for RetentionScheduleConfig {
    fn default() -> Self {
        RetentionScheduleConfig {
            startup_grace: Duration::from_secs(30 * 60),
            interval: Duration::from_secs(6 * 60 * 60),
            list_timeout: Duration::from_secs(10),
            lookup_timeout: Duration::from_secs(5),
            create_timeout: Duration::from_secs(10),
        }
    }
}

/// Decides *when* a retention sweep is allowed to run; does not perform
/// the sweep itself (that's the engine's metrics-retention job).
pub struct RetentionScheduler {
    config: RetentionScheduleConfig,
    started_at: Instant,
    last_run: Option<Instant>,
}

impl RetentionScheduler {
    pub fn new(config: RetentionScheduleConfig) -> Self {
        RetentionScheduler {
            config,
            started_at: Instant::now(),
            last_run: None,
        }
    }

    /// Whether a sweep may run right now: past the startup grace period,
    /// past the interval since the last run, and not reentering from
    /// inside a metrics op.
    pub fn may_run(&self, guard: &MetricsRecursionGuard) -> bool {
        if guard.is_metrics_op() {
            return false;
        }
        if self.started_at.elapsed() < self.config.startup_grace {
            return false;
        }
        match self.last_run {
            Some(last) => last.elapsed() >= self.config.interval,
            None => true,
        }
    }

    pub fn record_run(&mut self) {
        self.last_run = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate_config() -> RetentionScheduleConfig {
        RetentionScheduleConfig {
            startup_grace: Duration::from_millis(0),
            interval: Duration::from_millis(20),
            ..RetentionScheduleConfig::default()
        }
    }

    #[test]
    fn denies_reentry_from_metrics_op() {
        let scheduler = RetentionScheduler::new(immediate_config());
        let guard = MetricsRecursionGuard::new();
        let _scope = guard.enter();
        assert!(!scheduler.may_run(&guard));
    }

    #[test]
    fn first_run_allowed_once_past_grace() {
        let scheduler = RetentionScheduler::new(immediate_config());
        let guard = MetricsRecursionGuard::new();
        assert!(scheduler.may_run(&guard));
    }

    #[test]
    fn denies_until_interval_elapses() {
        let mut scheduler = RetentionScheduler::new(immediate_config());
        let guard = MetricsRecursionGuard::new();
        assert!(scheduler.may_run(&guard));
        scheduler.record_run();
        assert!(!scheduler.may_run(&guard));
        std::thread::sleep(Duration::from_millis(30));
        assert!(scheduler.may_run(&guard));
    }
}
