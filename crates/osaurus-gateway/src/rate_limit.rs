//! Per-plugin token buckets.
//!
//! Applies to routes with `auth` of `none` or `verify`; `owner` routes
//! bypass the limiter entirely. One bucket per plugin id, created on first
//! admission check; buckets never share state across ids.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

/// Default bucket capacity.
const DEFAULT_MAX_TOKENS: f64 = 100.0;
/// Default refill rate: a full bucket per minute.
const DEFAULT_REFILL_PER_SEC: f64 = 100.0 / 60.0;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by plugin id.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    max_tokens: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// Create a limiter with the standard 100-token, 100-per-minute rate.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate(DEFAULT_MAX_TOKENS, DEFAULT_REFILL_PER_SEC)
    }

    /// Create a limiter with a custom capacity and refill rate (tokens per
    /// second).
    #[must_use]
    pub fn with_rate(max_tokens: f64, refill_per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_per_sec,
        }
    }

    /// Admit or reject one request for `plugin_id`.
    ///
    /// Refills the bucket by elapsed time, then consumes one token if at
    /// least one is available.
    pub fn allow(&self, plugin_id: &str) -> bool {
        let now = Instant::now();
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned lock fails open: availability over precision here.
            return true;
        };
        let bucket = buckets
            .entry(plugin_id.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: self.max_tokens,
                last_refill: now,
            });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(plugin_id, "rate limited");
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
