//! Fixed-window request counting keyed by client and route category.
//!
//! Each key owns one [`RateLimitRecord`]. The first request of a window opens
//! it with `count = 1`; later requests increment until `max_requests`, after
//! which the key is rejected until `window_start + window` passes. Records
//! live in a sharded [`DashMap`] and the read-modify-write for a key happens
//! while holding that key's shard lock, so parallel requests cannot under-count.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    Api,
    Auth,
    Registration,
}

impl RateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Api => "api",
            RateCategory::Auth => "auth",
            RateCategory::Registration => "registration",
        }
    }

    /// Key under which `client` is counted for this category.
    pub fn key(&self, client: &str) -> String {
        format!("{}:{}", self.as_str(), client)
    }
}

impl fmt::Display for RateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_start: Instant,
    window: Duration,
}

impl RateLimitRecord {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            window_start: now,
            window,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }

    fn remaining_window(&self, now: Instant) -> Duration {
        (self.window_start + self.window).saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_after: Duration,
    /// Set only on rejection.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn admit(limit: u32, count: u32, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(count),
            reset_after,
            retry_after: None,
        }
    }

    fn reject(limit: u32, reset_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after: Some(reset_after),
        }
    }

    /// Retry-After header value: whole seconds, rounded up, never 0.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

pub struct RateLimiter {
    records: DashMap<String, RateLimitRecord>,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("records", &self.records.len())
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RateLimiter {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> RateLimitDecision {
        self.maybe_sweep(now);

        let window = policy.window();
        let limit = policy.max_requests;
        if limit == 0 {
            return RateLimitDecision::reject(0, window);
        }

        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord {
                count: 0,
                window_start: now,
                window,
            });
        let record = entry.value_mut();

        if record.count == 0 || record.expired(now) {
            *record = RateLimitRecord::open(now, window);
            return RateLimitDecision::admit(limit, record.count, window);
        }

        let reset_after = record.remaining_window(now);
        if record.count < limit {
            record.count += 1;
            return RateLimitDecision::admit(limit, record.count, reset_after);
        }

        debug!(key = %key, count = record.count, "rate limit exceeded");
        RateLimitDecision::reject(limit, reset_after)
    }

    fn maybe_sweep(&self, now: Instant) {
        let due = {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) >= self.sweep_interval {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.sweep_at(now);
        }
    }

    /// Drop every record whose window has closed. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.expired(now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "swept idle rate limit records");
        }
        removed
    }

    pub fn reset(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
