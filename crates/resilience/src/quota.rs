//! Outbound call quota.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default admissions per second, kept under the gateway's hard limit of 100.
pub const DEFAULT_QUOTA_PER_SECOND: usize = 95;

/// Sliding-window admission control.
///
/// Callers are admitted in arrival order: the admission log sits behind a
/// fair mutex, and a waiter holds it while sleeping for the window to
/// free up, so nobody behind it can overtake. Admitted calls then run
/// concurrently with no ordering guarantee on completion.
#[derive(Debug)]
pub struct QuotaManager {
    limit: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl QuotaManager {
    /// Creates a manager admitting at most `per_second` calls in any
    /// rolling second. A limit of zero is treated as one.
    pub fn new(per_second: usize) -> Self {
        Self::with_window(per_second, Duration::from_secs(1))
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            admissions: Mutex::new(VecDeque::with_capacity(limit.max(1))),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waits for a turn, then runs `f` to completion.
    pub async fn execute_with_quota<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        f().await
    }

    /// Admissions still free in the current window.
    pub async fn available(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        self.prune(&mut admissions, Instant::now());
        self.limit - admissions.len()
    }

    async fn acquire(&self) {
        let mut admissions = self.admissions.lock().await;
        loop {
            let now = Instant::now();
            self.prune(&mut admissions, now);
            if admissions.len() < self.limit {
                admissions.push_back(now);
                return;
            }

            let Some(oldest) = admissions.front().copied() else {
                continue;
            };
            metrics::counter!("quota_throttled_total").increment(1);
            tracing::debug!(
                limit = self.limit,
                wait_ms = (oldest + self.window).saturating_duration_since(now).as_millis() as u64,
                "quota window full, waiting"
            );
            tokio::time::sleep_until(oldest + self.window).await;
        }
    }

    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admissions.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_PER_SECOND)
    }
}
