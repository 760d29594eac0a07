//! Per-user sliding-window rate limiting
//!
//! Each user owns a window of recent request timestamps. Checking capacity
//! and recording the request happen under the same per-user entry lock, so
//! two concurrent requests from one user can never both observe spare
//! capacity and both be admitted past the cap.

use crate::models::UserId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default number of requests admitted per window
pub const DEFAULT_CAPACITY: usize = 3;

/// Default sliding window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum admitted requests inside one window
    pub capacity: usize,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still available in the current window
    pub remaining: usize,
    /// Time until the oldest request leaves the window; zero when allowed
    pub retry_after: Duration,
}

/// Sliding-window admission gate keyed by user
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<UserId, VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check the user's window and, if there is room, record this request.
    pub fn admit(&self, user: UserId) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(user).or_default();
        Self::expire(&mut window, now, self.config.window);

        if window.len() >= self.config.capacity {
            let retry_after = window
                .front()
                .map(|oldest| self.config.window.saturating_sub(now - *oldest))
                .unwrap_or_default();
            debug!(user_id = %user, retry_after_ms = retry_after.as_millis() as u64, "Rate limit reached");
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        window.push_back(now);
        RateDecision {
            allowed: true,
            remaining: self.config.capacity - window.len(),
            retry_after: Duration::ZERO,
        }
    }

    /// Give back the user's most recent reservation.
    ///
    /// Used when a request was reserved but then turned away, so that only
    /// admitted requests occupy the window.
    pub fn refund(&self, user: UserId) {
        if let Some(mut window) = self.windows.get_mut(&user) {
            if window.pop_back().is_some() {
                debug!(user_id = %user, "Refunded rate-limit reservation");
            }
        }
    }

    /// Requests still available to the user right now, without recording one
    pub fn remaining(&self, user: UserId) -> usize {
        let now = Instant::now();
        match self.windows.get(&user) {
            Some(window) => {
                let live = window
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.config.window)
                    .count();
                self.config.capacity.saturating_sub(live)
            }
            None => self.config.capacity,
        }
    }

    /// Physically drop expired timestamps and empty windows.
    ///
    /// Returns the number of users removed from the table.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            Self::expire(window, now, self.config.window);
            !window.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Swept idle rate-limit windows");
        }
        removed
    }

    /// Number of users with a tracked window
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }

    fn expire(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= length {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}
