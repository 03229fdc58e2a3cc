//! Fixed-window rate limiting over the shared store.
//!
//! Each caller gets one counter per window, keyed
//! `rate_limit:<ip>:<floor(now / window_ms)>`. Counters are never reset;
//! a new window simply uses a new key and the old one expires.
//!
//! The counter is read, compared, then atomically incremented. The count
//! returned by the increment is compared again, so callers racing past the
//! first read cannot push a window beyond `max_requests` admissions.

use std::sync::Arc;

use crate::security::context::now_millis;
use crate::security::options::RoutePolicy;
use crate::store::{keys, SharedStore, StoreError};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if admitted.
    pub count: u64,
    pub limit: u64,
    /// Seconds a denied caller should wait.
    pub retry_after_secs: u64,
}

/// Per-caller request budget enforcement.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn check_and_increment(
        &self,
        ip: &str,
        policy: &RoutePolicy,
    ) -> Result<RateDecision, StoreError> {
        self.check_and_increment_at(ip, policy, now_millis()).await
    }

    /// Same as `check_and_increment`, evaluated at `now_ms`.
    pub async fn check_and_increment_at(
        &self,
        ip: &str,
        policy: &RoutePolicy,
        now_ms: u64,
    ) -> Result<RateDecision, StoreError> {
        let window = policy.window;
        let limit = window.max_requests;
        let retry_after_secs = window.window_secs();

        if policy.options.skip_rate_limit {
            return Ok(RateDecision {
                allowed: true,
                count: 0,
                limit,
                retry_after_secs,
            });
        }

        let key = keys::rate_limit(ip, window.index_at(now_ms));
        let current = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().map_err(|_| StoreError::Corrupt {
                key: key.clone(),
                reason: format!("not a counter: {:?}", raw),
            })?,
            None => 0,
        };

        if current >= limit {
            return Ok(RateDecision {
                allowed: false,
                count: current,
                limit,
                retry_after_secs,
            });
        }

        let count = self.store.incr_ex(&key, window.ttl()).await?;
        if count > limit {
            tracing::debug!(ip = %ip, count, limit, "Concurrent request overshot window budget");
        }

        Ok(RateDecision {
            allowed: count <= limit,
            count,
            limit,
            retry_after_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::options::{RateWindow, SecurityOptions};
    use crate::store::MemoryStore;

    fn policy(window_ms: u64, max_requests: u64) -> RoutePolicy {
        RoutePolicy::resolve(
            "test",
            SecurityOptions {
                custom_rate_limit: Some(RateWindow {
                    window_ms,
                    max_requests,
                }),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_budget_then_deny_then_next_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let p = policy(60_000, 5);
        let t0 = 1_700_000_040_000; // start of a 60 s window

        for expected in 1..=5 {
            let d = limiter.check_and_increment_at("10.0.0.1", &p, t0 + expected).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.count, expected);
        }

        let denied = limiter.check_and_increment_at("10.0.0.1", &p, t0 + 30_000).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 60);

        // Denied requests do not consume budget.
        let again = limiter.check_and_increment_at("10.0.0.1", &p, t0 + 30_001).await.unwrap();
        assert_eq!(again.count, 5);

        let next = limiter.check_and_increment_at("10.0.0.1", &p, t0 + 60_000).await.unwrap();
        assert!(next.allowed);
        assert_eq!(next.count, 1);
    }

    #[tokio::test]
    async fn test_callers_are_counted_separately() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let p = policy(60_000, 1);
        assert!(limiter.check_and_increment_at("a", &p, 0).await.unwrap().allowed);
        assert!(!limiter.check_and_increment_at("a", &p, 1).await.unwrap().allowed);
        assert!(limiter.check_and_increment_at("b", &p, 2).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_default_budget() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let p = RoutePolicy::resolve("test", SecurityOptions::default());
        let d = limiter.check_and_increment("10.0.0.1", &p).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.limit, 1000);
        assert_eq!(d.retry_after_secs, 900);
    }

    #[tokio::test]
    async fn test_skip_rate_limit_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());
        let mut p = policy(60_000, 1);
        p.options.skip_rate_limit = true;
        for _ in 0..3 {
            assert!(limiter.check_and_increment("10.0.0.1", &p).await.unwrap().allowed);
        }
        assert!(store.is_empty());
    }

    // The counter check is hardened: the post-increment count is re-checked,
    // so a burst admits exactly `max_requests` even when reads interleave.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_admits_exactly_max_requests() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let p = Arc::new(policy(60_000, 5));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_and_increment_at("10.0.0.1", &p, 1_000).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }
}
