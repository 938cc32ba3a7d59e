//! Per-session token bucket rate limiting: "Rate cap:
//! per-session token bucket (default 200 Mbps, burst 50 MiB); excess frames
//! dropped and counted."
//!
//! A continuous token bucket rather than a fixed-window counter, since the
//! cap is expressed as a bits-per-second rate and a burst size rather than
//! a request count per window.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Thresholds for one session's shared (both-directions) token bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
 /// Sustained byte rate, in bytes/second.
 pub rate_bytes_per_sec: f64,
 /// Maximum burst, in bytes.
 pub burst_bytes: f64,
}

impl Default for RateLimiterConfig {
 fn default() -> Self {
 Self {
 rate_bytes_per_sec: 200_000_000.0 / 8.0, // 200 Mbps
 burst_bytes: 50.0 * 1024.0 * 1024.0, // 50 MiB
 }
 }
}

struct Bucket {
 tokens: f64,
 last_refill: Instant,
}

/// A single token bucket shared by both directions of a paired session.
pub struct TokenBucket {
 config: RateLimiterConfig,
 bucket: Mutex<Bucket>,
}

impl TokenBucket {
 /// Build a bucket starting full, per `config`.
 #[must_use]
 pub fn new(config: RateLimiterConfig) -> Self {
 Self {
 bucket: Mutex::new(Bucket {
 tokens: config.burst_bytes,
 last_refill: Instant::now(),
 }),
 config,
 }
 }

 /// Attempt to withdraw `n` bytes. Returns `false` (and does not mutate
 /// the bucket) if insufficient tokens are available; the caller drops
 /// the frame rather than blocking.
 pub async fn try_take(&self, n: u64) -> bool {
 let mut bucket = self.bucket.lock().await;
 let now = Instant::now();
 let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
 bucket.tokens = (bucket.tokens + elapsed * self.config.rate_bytes_per_sec).min(self.config.burst_bytes);
 bucket.last_refill = now;

 let cost = n as f64;
 if bucket.tokens >= cost {
 bucket.tokens -= cost;
 true
 } else {
 false
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[tokio::test]
 async fn burst_is_consumed_then_refused() {
 let bucket = TokenBucket::new(RateLimiterConfig {
 rate_bytes_per_sec: 1.0,
 burst_bytes: 100.0,
 });
 assert!(bucket.try_take(100).await);
 assert!(!bucket.try_take(1).await);
 }

 #[tokio::test]
 async fn tokens_refill_over_time() {
 let bucket = TokenBucket::new(RateLimiterConfig {
 rate_bytes_per_sec: 1_000_000.0,
 burst_bytes: 10.0,
 });
 assert!(bucket.try_take(10).await);
 assert!(!bucket.try_take(10).await);
 tokio::time::sleep(Duration::from_millis(20)).await;
 assert!(bucket.try_take(10).await);
 }
}
