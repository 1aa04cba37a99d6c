//! Per-client request limiter
//!
//! Fixed-window counters keyed by client identity. The counter map is an
//! LRU so a flood of distinct clients cannot grow it without bound.

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window rate limiter, constructed once and shared by the adapters
pub struct RateLimiter {
    windows: Mutex<LruCache<String, Window>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_tracked_clients).unwrap_or(NonZeroUsize::MIN);
        Self {
            windows: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `key`.
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now())
    }

    /// Count one request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        let mut windows = self.windows.lock();

        let expired = windows.peek(key).map_or(true, |w| now >= w.reset_at);
        if expired {
            windows.put(
                key.to_string(),
                Window {
                    count: 0,
                    reset_at: now + self.config.period,
                },
            );
        }
        let window = windows.get_mut(key).ok_or_else(|| Error::Internal {
            reason: "rate limit window missing".to_string(),
        })?;

        window.count += 1;
        if window.count > self.config.max_requests {
            let remaining = window.reset_at.saturating_duration_since(now);
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!(client = key, count = window.count, "Rate limit exceeded");
            return Err(Error::RateLimited { retry_after_secs });
        }

        Ok(())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(max_requests: u32, period_secs: u64, clients: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            period: Duration::from_secs(period_secs),
            max_tracked_clients: clients,
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = limiter(3, 60, 10);
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_at("10.0.0.1", now).unwrap();
        }
        match limiter.check_at("10.0.0.1", now + Duration::from_secs(20)) {
            Err(Error::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 40),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60, 10);
        let now = Instant::now();

        limiter.check_at("a", now).unwrap();
        limiter.check_at("b", now).unwrap();
        assert!(limiter.check_at("a", now).is_err());
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(2, 60, 10);
        let now = Instant::now();

        limiter.check_at("a", now).unwrap();
        limiter.check_at("a", now).unwrap();
        assert!(limiter.check_at("a", now).is_err());

        limiter.check_at("a", now + Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn test_tracked_clients_bounded() {
        let limiter = limiter(1, 60, 2);
        let now = Instant::now();

        limiter.check_at("a", now).unwrap();
        limiter.check_at("b", now).unwrap();
        limiter.check_at("c", now).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);

        // "a" was evicted, so it starts a fresh window
        limiter.check_at("a", now).unwrap();
    }
}
