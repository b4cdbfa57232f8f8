//! Dynamic request throttling (spec.md §4.8.4).
//!
//! A per-client token-bucket rate limiter. Under load, metrics-adjacent
//! endpoints are shed first (their throttle kicks in at a lower
//! threshold) so core CRUD latency is preserved; this module only
//! implements the bucket itself, the endpoint classification lives at
//! the boundary layer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Token-bucket parameters for one throttle tier.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Maximum burst size (bucket capacity), in requests.
    pub capacity: i64,
    /// Tokens replenished per second.
    pub refill_per_sec: f64,
}

impl ThrottleConfig {
    /// The core-CRUD tier: generous, rarely engages.
    pub fn core() -> Self {
        ThrottleConfig {
            capacity: 200,
            refill_per_sec: 100.0,
        }
    }

    /// The metrics-adjacent tier: shed first under load (§4.8.4).
    pub fn metrics_adjacent() -> Self {
        ThrottleConfig {
            capacity: 20,
            refill_per_sec: 5.0,
        }
    }
}

struct Bucket {
    tokens: AtomicI64,
    last_refill: std::sync::Mutex<Instant>,
}

/// Per-client-identity throttle keyed by an arbitrary string (caller's
/// choice — API key, session id, source IP).
pub struct Throttle {
    config: ThrottleConfig,
    buckets: DashMap<String, Bucket>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Throttle {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Attempt to consume one token for `client`. `false` means the
    /// caller should shed this request (HTTP 429 at the boundary).
    pub fn try_acquire(&self, client: &str) -> bool {
        let bucket = self.buckets.entry(client.to_string()).or_insert_with(|| Bucket {
            tokens: AtomicI64::new(self.config.capacity),
            last_refill: std::sync::Mutex::new(Instant::now()),
        });

        {
            let mut last = bucket.last_refill.lock().unwrap();
            let elapsed = last.elapsed();
            if elapsed > Duration::from_millis(10) {
                let refill = (elapsed.as_secs_f64() * self.config.refill_per_sec) as i64;
                if refill > 0 {
                    let current = bucket.tokens.load(Ordering::SeqCst);
                    let new = (current + refill).min(self.config.capacity);
                    bucket.tokens.store(new, Ordering::SeqCst);
                    *last = Instant::now();
                }
            }
        }

        let mut current = bucket.tokens.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                return false;
            }
            match bucket.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn clients_tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refills() {
        let throttle = Throttle::new(ThrottleConfig {
            capacity: 2,
            refill_per_sec: 1000.0,
        });
        assert!(throttle.try_acquire("client-a"));
        assert!(throttle.try_acquire("client-a"));
        assert!(!throttle.try_acquire("client-a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.try_acquire("client-a"));
    }

    #[test]
    fn clients_are_independent() {
        let throttle = Throttle::new(ThrottleConfig {
            capacity: 1,
            refill_per_sec: 0.0,
        });
        assert!(throttle.try_acquire("a"));
        assert!(!throttle.try_acquire("a"));
        assert!(throttle.try_acquire("b"));
    }
}
