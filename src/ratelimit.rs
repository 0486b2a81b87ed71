// repolens/src/ratelimit.rs
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window admission control, one independent window per credential.
///
/// Shared process-wide behind an `Arc`; every pipeline invocation that talks
/// to the model goes through the same instance so concurrent runs see each
/// other's calls. Saturating one credential never blocks another.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    retry_interval: Duration,
    windows: Mutex<HashMap<usize, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration, retry_interval: Duration) -> Self {
        Self {
            limit,
            window,
            retry_interval,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a call for `credential` and returns true if the window has room.
    /// A refused call is not recorded.
    pub fn try_admit(&self, credential: usize) -> bool {
        self.admit_at(credential, Instant::now())
    }

    fn admit_at(&self, credential: usize, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = windows.entry(credential).or_default();

        if let Some(window_start) = now.checked_sub(self.window) {
            while timestamps.front().is_some_and(|ts| *ts <= window_start) {
                timestamps.pop_front();
            }
        }

        if timestamps.len() >= self.limit {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Suspends until `credential` is admitted, polling at the retry interval.
    pub async fn wait_for_slot(&self, credential: usize) {
        let mut waited = 0u32;
        while !self.try_admit(credential) {
            if waited == 0 {
                debug!(credential, "rate limit reached, waiting for a slot");
            }
            waited += 1;
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Number of calls currently counted against `credential`'s window.
    pub fn in_flight(&self, credential: usize) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .get(&credential)
            .map(|ts| {
                ts.iter()
                    .filter(|t| now.checked_sub(self.window).map_or(true, |start| **t > start))
                    .count()
            })
            .unwrap_or(0)
    }
}
