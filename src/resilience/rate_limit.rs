//! Token bucket rate limiting for outbound requests.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A simple token bucket.
///
/// Tokens may go negative: a caller that finds the bucket empty reserves the
/// next token and sleeps until it has been refilled, so concurrent waiters are
/// spaced `1 / rate` apart instead of waking together.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take one token, returning how long the caller must wait for it.
    fn reserve(&mut self, capacity: f64, refill_rate: f64) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / refill_rate)
        }
    }

    /// Give back a reserved token the caller never used.
    fn cancel_reservation(&mut self, capacity: f64) {
        self.tokens = (self.tokens + 1.0).min(capacity);
    }
}

/// Async rate limiter shared by every request of a client.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// Create a limiter refilling `requests_per_second` tokens up to `burst`.
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            rate: requests_per_second.max(1) as f64,
            burst,
        }
    }

    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");
        bucket.reserve(self.burst, self.rate)
    }

    /// Wait until a request may proceed.
    ///
    /// Dropping the returned future while it sleeps returns the reserved
    /// token to the bucket.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if wait.is_zero() {
            return;
        }

        let mut guard = ReservationGuard {
            limiter: self,
            armed: true,
        };
        tokio::time::sleep(wait).await;
        guard.armed = false;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}

struct ReservationGuard<'a> {
    limiter: &'a RateLimiter,
    armed: bool,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut bucket = self
                .limiter
                .bucket
                .lock()
                .expect("rate limiter mutex poisoned");
            bucket.cancel_reservation(self.limiter.burst);
        }
    }
}
