//! Token-bucket rate limiter
//!
//! Tokens refill continuously at `rate` per second up to `capacity`. Acquiring
//! reserves a token immediately, letting the balance go negative, and the caller
//! sleeps until its reservation is covered. Waiters are therefore released in
//! reservation order and a waiter never sleeps longer than its queue position
//! divided by the rate. A waiter dropped before its sleep completes hands its
//! reservation back.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide limiter settings, applied per target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size
    pub capacity: f64,
    /// Refill rate in tokens per second
    pub rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            rate: 10.0,
        }
    }
}

impl RateLimitConfig {
    /// Same bucket size with the refill rate scaled by a platform hint
    pub fn scaled(&self, hint: f64) -> Self {
        let hint = if hint.is_finite() && hint > 0.0 { hint } else { 1.0 };
        Self {
            capacity: self.capacity,
            rate: self.rate * hint,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Continuous-refill token bucket
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    rate: f64,
    bucket: Mutex<Bucket>,
}

const MIN_RATE: f64 = 1e-3;

impl RateLimiter {
    pub fn new(capacity: f64, rate: f64) -> Self {
        let capacity = if capacity.is_finite() { capacity.max(1.0) } else { 1.0 };
        let rate = if rate.is_finite() { rate.max(MIN_RATE) } else { MIN_RATE };
        Self {
            capacity,
            rate,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.rate)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Wait until a token is available. Never fails, only delays.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if wait.is_zero() {
            return;
        }
        let mut reservation = Reservation {
            limiter: self,
            settled: false,
        };
        tokio::time::sleep(wait).await;
        reservation.settled = true;
    }

    /// Take a token only if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current balance; negative while reservations are outstanding
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens + 1.0).min(self.capacity);
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}

/// A token taken ahead of time; returned unless the wait ran to completion
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    settled: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter.refund();
        }
    }
}
