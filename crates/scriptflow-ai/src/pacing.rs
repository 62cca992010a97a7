use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::debug;

/// Quota the upstream last reported through `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamQuota {
    pub limit: u32,
    pub remaining: u32,
    /// Window reset as seconds since the Unix epoch.
    pub reset_epoch_secs: u64,
}

impl UpstreamQuota {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        Some(Self {
            limit: u32::try_from(read("x-ratelimit-limit")?).ok()?,
            remaining: u32::try_from(read("x-ratelimit-remaining")?).ok()?,
            reset_epoch_secs: read("x-ratelimit-reset")?,
        })
    }

    /// Time left until the window resets, zero once it has passed.
    fn until_reset(&self, now: SystemTime) -> Duration {
        (UNIX_EPOCH + Duration::from_secs(self.reset_epoch_secs))
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct PacerState {
    next_slot: Option<Instant>,
    quota: Option<UpstreamQuota>,
}

/// Client-side pacing of outgoing requests.
///
/// Every request reserves a send slot at least `min_interval` after the
/// previous one. While the upstream reports an exhausted quota the slot moves
/// to the window reset. No single wait exceeds `max_wait`.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    max_wait: Duration,
    state: Mutex<PacerState>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration, max_wait: Duration) -> Self {
        Self {
            min_interval,
            max_wait,
            state: Mutex::new(PacerState::default()),
        }
    }

    /// Reserve the next send slot and return how long the caller must wait for it.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.state.lock();

        let mut slot = state.next_slot.map_or(now, |next| next.max(now));
        if let Some(quota) = state.quota.filter(|q| q.remaining == 0) {
            slot = slot.max(now + quota.until_reset(SystemTime::now()));
            state.quota = None;
        }
        let wait = slot.saturating_duration_since(now).min(self.max_wait);
        state.next_slot = Some(now + wait + self.min_interval);
        wait
    }

    /// Wait for the next send slot.
    pub async fn wait(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Pacing upstream request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Refresh the upstream quota from response headers; absent headers leave it unchanged.
    pub fn observe(&self, headers: &HeaderMap) {
        if let Some(quota) = UpstreamQuota::from_headers(headers) {
            self.state.lock().quota = Some(quota);
        }
    }

    pub fn quota(&self) -> Option<UpstreamQuota> {
        self.state.lock().quota
    }

    pub fn reset(&self) {
        *self.state.lock() = PacerState::default();
    }
}
