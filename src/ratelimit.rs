//! Per-(client, endpoint) fixed-window counters with eviction (spec §4.4).

use std::sync::Arc;

use crate::config::ConfigManager;
use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
}

pub struct RateLimiter {
    store: Arc<Store>,
    config: Arc<ConfigManager>,
}

impl RateLimiter {
    pub fn new(store: Arc<Store>, config: Arc<ConfigManager>) -> Self {
        RateLimiter { store, config }
    }

    /// Check and, on allow, increment the fixed-window counter for
    /// `(ip, endpoint)`. A denied request does not mutate the counter.
    pub fn check(&self, ip: &str, endpoint: &str, now_unix: i64) -> Result<RateLimitDecision, StoreError> {
        let cfg = self.config.get();
        if !cfg.rate_limit.enabled {
            return Ok(RateLimitDecision { allowed: true, limit: u32::MAX, remaining: u32::MAX, reset_at: now_unix });
        }
        let Some(rule) = cfg
            .rate_limit
            .limits
            .get(endpoint)
            .or_else(|| cfg.rate_limit.limits.get("default"))
        else {
            return Ok(RateLimitDecision { allowed: true, limit: u32::MAX, remaining: u32::MAX, reset_at: now_unix });
        };

        let window_seconds = rule.window_seconds as i64;
        let window_start = now_unix - now_unix.rem_euclid(window_seconds);
        let reset_at = window_start + window_seconds;
        let key = format!("{ip}:{endpoint}");

        let current = self.store.rate_limit_get(&key)?;
        let count_before_this_request = match current {
            Some((count, ws)) if ws == window_start => count,
            _ => 0,
        };

        if count_before_this_request >= rule.max_requests as i64 {
            return Ok(RateLimitDecision {
                allowed: false,
                limit: rule.max_requests,
                remaining: 0,
                reset_at,
            });
        }

        let new_count = self.store.rate_limit_bump(&key, window_start)?;
        let remaining = (rule.max_requests as i64 - new_count).max(0) as u32;
        Ok(RateLimitDecision { allowed: true, limit: rule.max_requests, remaining, reset_at })
    }

    pub fn reset(&self, ip: &str, endpoint: Option<&str>) -> Result<u64, StoreError> {
        self.store.rate_limit_reset(ip, endpoint)
    }

    /// Delete rows older than one hour.
    pub fn cleanup(&self, now_unix: i64) -> Result<u64, StoreError> {
        self.store.rate_limit_cleanup(now_unix - 3600)
    }

    pub fn top_ips(&self, n: u32) -> Result<Vec<(String, i64)>, StoreError> {
        self.store.rate_limit_top_ips(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPatch, EndpointLimit, RateLimitPatch};
    use std::collections::HashMap;

    fn limiter_with_limit(max_requests: u32, window_seconds: u32) -> RateLimiter {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Arc::new(ConfigManager::new(store.clone()).unwrap());
        let mut limits = HashMap::new();
        limits.insert("X".to_owned(), EndpointLimit { max_requests, window_seconds });
        config
            .update(ConfigPatch {
                rate_limit: Some(RateLimitPatch { enabled: Some(true), limits: Some(limits) }),
                ..Default::default()
            })
            .unwrap();
        RateLimiter::new(store, config)
    }

    #[test]
    fn fourth_of_three_is_denied_with_correct_headers() {
        let limiter = limiter_with_limit(3, 60);
        let now = 1_000_000i64 - (1_000_000i64 % 60); // aligned to a window boundary
        let mut last = None;
        for _ in 0..3 {
            let d = limiter.check("1.2.3.4", "X", now).unwrap();
            assert!(d.allowed);
            last = Some(d);
        }
        assert_eq!(last.unwrap().remaining, 0);

        let denied = limiter.check("1.2.3.4", "X", now).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 3);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, now + 60);
    }

    #[test]
    fn denied_request_does_not_increment_counter() {
        let limiter = limiter_with_limit(1, 60);
        let now = 1_000_000i64 - (1_000_000i64 % 60);
        assert!(limiter.check("9.9.9.9", "X", now).unwrap().allowed);
        assert!(!limiter.check("9.9.9.9", "X", now).unwrap().allowed);
        assert!(!limiter.check("9.9.9.9", "X", now).unwrap().allowed);
        let (count, _) = limiter.store.rate_limit_get("9.9.9.9:X").unwrap().unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn new_window_resets_remaining_to_max_minus_one() {
        let limiter = limiter_with_limit(5, 60);
        let w0 = 0i64;
        limiter.check("a", "X", w0).unwrap();
        let w1 = 60i64;
        let d = limiter.check("a", "X", w1).unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn disabled_rate_limiting_always_allows() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Arc::new(ConfigManager::new(store.clone()).unwrap());
        config
            .update(ConfigPatch { rate_limit: Some(RateLimitPatch { enabled: Some(false), limits: None }), ..Default::default() })
            .unwrap();
        let limiter = RateLimiter::new(store, config);
        for _ in 0..1000 {
            assert!(limiter.check("z", "X", 0).unwrap().allowed);
        }
    }
}
