//! Per-metrics-component circuit breaker (spec.md §4.8.2).
//!
//! `CLOSED -> (N consecutive failures) -> OPEN -> (cooldown elapsed) ->
//! HALF-OPEN -> (success) -> CLOSED | (failure) -> OPEN`.
//!
//! Each metrics subsystem (background collector, request-metrics
//! middleware) owns its own breaker instance; an open breaker silently
//! drops metric writes rather than propagating an error to the
//! foreground path.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Configuration for one breaker: failure count before tripping, and
/// cooldown before a half-open probe is allowed.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

/// A single metrics-component circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreaker {
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            trips: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Total number of times this breaker has tripped open, for metrics.
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }

    /// Whether a caller is currently allowed to attempt the guarded
    /// operation. `OPEN` denies until the cooldown elapses, at which
    /// point the breaker moves itself to `HALF-OPEN` and allows exactly
    /// the probing caller through.
    pub fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let mut opened_at = self.opened_at.lock();
                match *opened_at {
                    Some(at) if at.elapsed() >= self.config.cooldown => {
                        self.state.store(BreakerState::HalfOpen as u8, Ordering::SeqCst);
                        *opened_at = None;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Record a successful call through the breaker.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(BreakerState::Closed as u8, Ordering::SeqCst);
        *self.opened_at.lock() = None;
    }

    /// Record a failed call. From `HALF-OPEN` this immediately reopens;
    /// from `CLOSED` this trips the breaker once `failure_threshold`
    /// consecutive failures have accumulated.
    pub fn record_failure(&self) {
        match self.state() {
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.state.store(BreakerState::Open as u8, Ordering::SeqCst);
        *self.opened_at.lock() = Some(Instant::now());
        self.trips.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..2 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_success() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
