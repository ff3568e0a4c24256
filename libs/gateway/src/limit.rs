use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default budget of the remote API: 3 requests per second.
pub const DEFAULT_RATE_PER_SEC: u32 = 3;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by every gateway client in the process.
///
/// `acquire` blocks the caller until a slot is available, which is the
/// natural backpressure against the rate-limited remote API.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    rate_per_sec: f64,
}

impl RateLimiter {
    /// `capacity` = max burst, `rate_per_sec` = tokens added per second.
    pub fn new(capacity: u32, rate_per_sec: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            rate_per_sec: rate_per_sec.max(1) as f64,
        }
    }

    /// Wait until one token is available and spend it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Time until the next whole token accrues.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_PER_SEC, DEFAULT_RATE_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_is_immediate() {
        let limiter = RateLimiter::new(3, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_delays_the_caller() {
        let limiter = RateLimiter::new(1, 1);
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // With the paused clock the sleep is virtual but still accounted.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
