//! Per-user fixed-window request limits.
//!
//! Windows live in memory. Every 1024 checks the limiter drops the
//! windows that have already expired, so callers that stop sending requests
//! do not keep an entry forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::AuthError;

const SWEEP_EVERY: u64 = 1024;

/// A named request budget per caller and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub bucket: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

const HOUR: Duration = Duration::from_secs(3600);

impl RateLimitPolicy {
    /// Profile reads and listings
    pub const DEFAULT: RateLimitPolicy = RateLimitPolicy::new("default", 100, HOUR);
    pub const CREATE_SUBSCRIPTION: RateLimitPolicy =
        RateLimitPolicy::new("create_subscription", 10, HOUR);
    pub const DEPLOY: RateLimitPolicy = RateLimitPolicy::new("deploy", 20, HOUR);
    pub const TEARDOWN: RateLimitPolicy = RateLimitPolicy::new("teardown", 50, HOUR);

    pub const fn new(bucket: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            bucket,
            max_requests,
            window,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }
}

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(String, &'static str), Window>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request by `user_id` against `policy`.
    pub fn check(&self, user_id: &str, policy: &RateLimitPolicy) -> Result<(), AuthError> {
        self.check_at(user_id, policy, Instant::now())
    }

    fn check_at(
        &self,
        user_id: &str,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> Result<(), AuthError> {
        // must run before the entry guard below is taken
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.prune_expired(now);
        }

        let mut entry = self
            .windows
            .entry((user_id.to_string(), policy.bucket))
            .or_insert(Window {
                started: now,
                length: policy.window,
                count: 0,
            });

        let mut elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= policy.window {
            entry.started = now;
            entry.length = policy.window;
            entry.count = 0;
            elapsed = Duration::ZERO;
        }

        if entry.count >= policy.max_requests {
            let retry_after = policy.window.saturating_sub(elapsed);
            warn!(
                "Rate limit hit for user {} on {} ({} requests)",
                user_id, policy.bucket, entry.count
            );
            return Err(AuthError::RateLimited {
                bucket: policy.bucket.to_string(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }

    fn prune_expired(&self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!("Evicted {} expired rate limit windows", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: RateLimitPolicy = RateLimitPolicy::new("tiny", 2, Duration::from_secs(60));

    #[test]
    fn test_limit_is_enforced_per_user() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.check_at("a", &TINY, now).is_ok());
        assert!(limiter.check_at("a", &TINY, now).is_ok());
        assert!(matches!(
            limiter.check_at("a", &TINY, now),
            Err(AuthError::RateLimited { .. })
        ));

        assert!(limiter.check_at("b", &TINY, now).is_ok());
    }

    #[test]
    fn test_buckets_are_independent() {
        let limiter = RateLimiter::new();
        let other = RateLimitPolicy::new("other", 1, Duration::from_secs(60));
        let now = Instant::now();

        limiter.check_at("a", &TINY, now).unwrap();
        limiter.check_at("a", &TINY, now).unwrap();
        assert!(limiter.check_at("a", &other, now).is_ok());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        limiter.check_at("a", &TINY, start).unwrap();
        limiter.check_at("a", &TINY, start).unwrap();
        assert!(limiter.check_at("a", &TINY, start).is_err());

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("a", &TINY, later).is_ok());
    }

    #[test]
    fn test_expired_windows_are_evicted() {
        let limiter = RateLimiter::new();
        let long = RateLimitPolicy::new("long", 5, Duration::from_secs(3600));
        let start = Instant::now();

        limiter.check_at("idle", &TINY, start).unwrap();
        limiter.check_at("busy", &long, start).unwrap();
        assert_eq!(limiter.windows.len(), 2);

        limiter.prune_expired(start + Duration::from_secs(61));
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key(&("busy".to_string(), "long")));
    }

    #[test]
    fn test_sweep_runs_as_checks_accumulate() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let many = RateLimitPolicy::new("many", u32::MAX, Duration::from_secs(60));

        for user in 0..10 {
            limiter.check_at(&format!("user-{}", user), &TINY, start).unwrap();
        }
        assert_eq!(limiter.windows.len(), 10);

        let later = start + Duration::from_secs(61);
        for _ in 10..SWEEP_EVERY {
            limiter.check_at("active", &many, later).unwrap();
        }
        assert_eq!(limiter.windows.len(), 1);
    }

    #[test]
    fn test_builtin_budgets() {
        assert_eq!(RateLimitPolicy::DEFAULT.max_requests, 100);
        assert_eq!(RateLimitPolicy::CREATE_SUBSCRIPTION.max_requests, 10);
        assert_eq!(RateLimitPolicy::DEPLOY.max_requests, 20);
        assert_eq!(RateLimitPolicy::TEARDOWN.max_requests, 50);
    }
}
