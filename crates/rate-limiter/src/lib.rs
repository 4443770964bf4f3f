//! Per-site token buckets shared by every fetch worker.
//!
//! Each site gets a bucket with capacity equal to its per-minute rate,
//! refilled continuously at rate/60 tokens per second. `acquire` parks the
//! caller until a token is available; a token is only deducted at the
//! moment of grant, so a cancelled (dropped) wait consumes nothing.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

impl Bucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
            cooldown_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or return how long to wait before trying again.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Err(until.duration_since(now));
            }
            self.cooldown_until = None;
        }

        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }
}

/// One instance shared (via `Arc`) by all workers.
pub struct SiteRateLimiter {
    buckets: Mutex<HashMap<i64, Bucket>>,
    default_per_minute: u32,
}

impl SiteRateLimiter {
    pub fn new(default_per_minute: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_per_minute: default_per_minute.max(1),
        }
    }

    /// Declare a site's configured rate ahead of time. Sites never
    /// registered fall back to the default rate on first acquire.
    pub async fn register(&self, site_id: i64, per_minute: Option<u32>) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(
            site_id,
            Bucket::new(per_minute.unwrap_or(self.default_per_minute)),
        );
    }

    /// Block until a token for `site_id` is available, then consume it.
    pub async fn acquire(&self, site_id: i64) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(site_id)
                    .or_insert_with(|| Bucket::new(self.default_per_minute));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };

            tracing::trace!(site_id, wait_ms = wait.as_millis() as u64, "rate limiter wait");
            // Small pad so we do not wake just before the token lands.
            tokio::time::sleep(wait + Duration::from_millis(20)).await;
        }
    }

    /// Impose a cool-down (e.g. after a Blocked response). Tokens do not
    /// accumulate during the cool-down window.
    pub async fn impose_cooldown(&self, site_id: i64, cooldown: Duration) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(site_id)
            .or_insert_with(|| Bucket::new(self.default_per_minute));
        let until = Instant::now() + cooldown;
        bucket.cooldown_until = Some(until);
        bucket.tokens = 0.0;
        bucket.last_refill = until;
        tracing::warn!(site_id, cooldown_secs = cooldown.as_secs(), "site cooling down");
    }
}
