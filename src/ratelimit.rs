//! Fixed-window request limiter
//!
//! Process-local: each key gets `max_requests` per window, counted from the
//! key's first request. Expired windows are evicted by [`RateLimiter::cleanup`],
//! which the server runs every [`CLEANUP_INTERVAL`].

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::{CareError, Result};

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Count a request against `key`
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now > entry.reset_at {
            *entry = Window {
                count: 0,
                reset_at: now + self.window,
            };
        }

        if entry.count >= self.max_requests {
            let remaining = entry.reset_at.saturating_duration_since(now);
            // round up so clients never retry early
            let retry_after_secs = remaining.as_millis().div_ceil(1000).max(1) as u64;
            return Err(CareError::TooManyRequests {
                message: TOO_MANY_REQUESTS.to_string(),
                retry_after_secs,
            });
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop expired windows
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| now <= w.reset_at);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Evict expired windows every [`CLEANUP_INTERVAL`]
pub fn spawn_cleanup_task(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;
            let before = limiter.tracked_keys();
            limiter.cleanup();
            let removed = before.saturating_sub(limiter.tracked_keys());
            if removed > 0 {
                debug!("Rate limiter cleanup: removed {} expired windows", removed);
            }
        }
    });
    info!("Rate limiter cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_then_reject() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        assert!(limiter.check_at("ip:1", now).is_ok());
        assert!(limiter.check_at("ip:1", now).is_ok());

        match limiter.check_at("ip:1", now) {
            Err(CareError::TooManyRequests { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, 60)
            }
            other => panic!("expected 429, got {:?}", other),
        }

        // other keys are independent
        assert!(limiter.check_at("ip:2", now).is_ok());
    }

    #[test]
    fn test_rejected_requests_do_not_count() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("k", now).is_ok());
        }
        for _ in 0..50 {
            assert!(limiter.check_at("k", now).is_err());
        }
        assert_eq!(limiter.windows.get("k").map(|w| w.count), Some(3));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let start = Instant::now();
        assert!(limiter.check_at("k", start).is_ok());
        assert!(limiter.check_at("k", start).is_err());
        assert!(limiter.check_at("k", start + Duration::from_millis(1500)).is_ok());
    }

    #[test]
    fn test_cleanup_evicts_expired() {
        let limiter = RateLimiter::new(Duration::from_millis(0), 5);
        limiter.check("a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
