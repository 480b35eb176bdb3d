//! Token-bucket bound on provider parallelism
//!
//! The adapter acquires one token per outbound call; batch admin
//! operations are implicitly throttled through it.

use crate::config::RateLimitConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A token bucket refilled at a fixed rate.
///
/// `acquire` suspends until a token is available, which keeps provider
/// call rates inside the configured budget without queueing reads.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: u32,
    refill_per_second: u32,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: config.capacity.max(1),
            refill_per_second: config.refill_per_second.max(1),
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_second as f64)
                    .min(self.capacity as f64);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_second as f64,
                    ))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_up_to_capacity_without_waiting() {
        let bucket = TokenBucket::new(&RateLimitConfig {
            capacity: 3,
            refill_per_second: 1,
        });
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn waits_when_bucket_is_drained() {
        let bucket = TokenBucket::new(&RateLimitConfig {
            capacity: 1,
            refill_per_second: 10,
        });
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
