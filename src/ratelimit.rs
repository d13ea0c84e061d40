// SPDX-License-Identifier: MPL-2.0

//! Sliding-window request limiter shared by every outbound API call.
//!
//! The AppView enforces 3000 requests per 5 minutes per client. We stay under
//! a lower quota and additionally space grants out by a minimum delay so a
//! burst of concurrent fetches never arrives as a single spike.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_REQUESTS: usize = 2500;
pub const DEFAULT_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MIN_DELAY_MS: u64 = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter wait cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
    pub min_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

/// Snapshot of limiter usage inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    pub used: usize,
    pub remaining: usize,
    /// Time until the oldest recorded grant leaves the window.
    pub window_reset_in: Duration,
}

/// Sliding-window limiter with minimum spacing between grants.
///
/// One instance is constructed per account and handed to every component that
/// talks to the network. Prune-and-record happens under a single lock, so two
/// concurrent callers can never both be granted the last slot.
///
/// ```ignore
/// let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
/// limiter.acquire(&cancel).await?;
/// ```
pub struct RateLimiter {
    config: RateLimitConfig,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        // A zero quota would never grant anything.
        let config = RateLimitConfig {
            max_requests: config.max_requests.max(1),
            ..config
        };

        Self {
            config,
            grants: Mutex::new(VecDeque::with_capacity(config.max_requests.min(4096))),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until one more request fits the quota, then record it.
    ///
    /// Every wake-up re-evaluates the window from scratch: other callers may
    /// have been granted in the meantime, or more grants may have expired.
    /// Returns `Cancelled` as soon as the token fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let wait = match self.try_grant(Instant::now()) {
                None => return Ok(()),
                Some(wait) => wait,
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Record a grant at `now` if allowed, otherwise return how long to wait.
    fn try_grant(&self, now: Instant) -> Option<Duration> {
        let mut grants = self.lock();
        Self::prune(&mut grants, now, self.config.window());

        if grants.len() >= self.config.max_requests
            && let Some(&oldest) = grants.front()
        {
            return Some((oldest + self.config.window()).saturating_duration_since(now));
        }

        if let Some(&last) = grants.back() {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_delay() {
                return Some(self.config.min_delay() - elapsed);
            }
        }

        grants.push_back(now);
        None
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let mut grants = self.lock();
        Self::prune(&mut grants, now, self.config.window());

        let used = grants.len();
        let window_reset_in = grants
            .front()
            .map(|&oldest| (oldest + self.config.window()).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        RateLimitStats {
            used,
            remaining: self.config.max_requests.saturating_sub(used),
            window_reset_in,
        }
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn prune(grants: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = grants.front() {
            if now.saturating_duration_since(oldest) >= window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // The history stays consistent even if a holder panicked mid-prune.
        self.grants.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn small_config() -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 5,
            window_ms: 1_000,
            min_delay_ms: 10,
        }
    }

    async fn grant_times(limiter: Arc<RateLimiter>, callers: usize) -> Vec<Instant> {
        let cancel = CancellationToken::new();
        let tasks = (0..callers).map(|_| {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            async move {
                limiter.acquire(&cancel).await.unwrap();
                Instant::now()
            }
        });

        let mut times = futures::future::join_all(tasks).await;
        times.sort();
        times
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_quota() {
        let config = small_config();
        let limiter = Arc::new(RateLimiter::new(config));
        let times = grant_times(limiter, 23).await;

        assert_eq!(times.len(), 23);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < config.window())
                .count();
            assert!(
                in_window <= config.max_requests,
                "{in_window} grants inside one window starting at grant {i}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_grants_respect_min_delay() {
        let config = small_config();
        let limiter = Arc::new(RateLimiter::new(config));
        let times = grant_times(limiter, 12).await;

        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= config.min_delay());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_oldest_grant_to_expire() {
        let config = RateLimitConfig {
            max_requests: 2,
            window_ms: 500,
            min_delay_ms: 0,
        };
        let limiter = RateLimiter::new(config);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(Instant::now(), start);

        limiter.acquire(&cancel).await.unwrap();
        assert!(Instant::now().duration_since(start) >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reports_usage() {
        let limiter = RateLimiter::new(small_config());
        let cancel = CancellationToken::new();

        let stats = limiter.stats();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.remaining, 5);
        assert_eq!(stats.window_reset_in, Duration::ZERO);

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        let stats = limiter.stats();
        assert_eq!(stats.used, 2);
        assert_eq!(stats.remaining, 3);
        assert!(stats.window_reset_in <= Duration::from_millis(1_000));
        assert!(stats.window_reset_in > Duration::ZERO);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(limiter.stats().used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_history() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
            min_delay_ms: 0,
        });
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.reset();
        limiter.acquire(&cancel).await.unwrap();

        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
            min_delay_ms: 0,
        }));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::advance(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(RateLimitError::Cancelled));
        assert_eq!(limiter.stats().used, 1);
    }

    #[test]
    fn test_zero_quota_is_clamped() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 0,
            ..RateLimitConfig::default()
        });
        assert_eq!(limiter.config().max_requests, 1);
    }
}
