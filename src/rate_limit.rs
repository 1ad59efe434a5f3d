//! Single-slot rate limiter for source calls.
//!
//! Calls through one [`RateLimiter`] are strictly serialized: a call
//! starts only after the previous one has *completed* and at least
//! `min_interval` has passed since that completion. There is no burst
//! allowance.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Serializes calls and spaces them by a minimum interval.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    /// Completion time of the previous call. Held for the whole call.
    last_completed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_completed: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time left before the next call may start, without waiting.
    pub async fn time_until_ready(&self) -> Duration {
        match *self.last_completed.lock().await {
            Some(prev) => (prev + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Wait for the slot, run `call`, and record its completion.
    pub async fn run<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last = self.last_completed.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_interval).await;
        }
        let out = call().await;
        *last = Some(Instant::now());
        out
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
