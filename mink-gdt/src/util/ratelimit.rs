//! Token-bucket rate limiter, used to cap registration attempts and heartbeat probes per peer.
use std::time::{Duration, Instant};

/// A simple token bucket: `capacity` tokens, refilled continuously at `rate` tokens/sec.
pub struct RateLimiter {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, rate_per_sec: u32) -> RateLimiter {
        RateLimiter {
            capacity: capacity as f64,
            rate: rate_per_sec as f64,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to consume one token. Returns `true` if the action is allowed.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_drains_then_refills() {
        let mut limiter = RateLimiter::new(2, 10);
        assert!(limiter.try_acquire_at(Instant::now()));
        assert!(limiter.try_acquire_at(Instant::now()));
        assert!(!limiter.try_acquire_at(Instant::now()));

        let later = Instant::now() + Duration::from_millis(200);
        assert!(limiter.try_acquire_at(later));
    }
}
