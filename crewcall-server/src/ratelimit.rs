//! Per-identity rate limiting of request ingestion.
//!
//! Token buckets keyed by the caller's identity (session user, or
//! `anonymous`), with configurable burst and refill rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Bucket capacity
    pub burst: u32,
    /// Tokens refilled per second
    pub refill_rate: f64,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 10,
            refill_rate: 1.0,
            enabled: true,
        }
    }
}

/// Rejection carrying how long the caller should wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds for a `Retry-After` header, never zero
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.as_secs_f64().ceil().max(1.0) as u64
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    fn take(&mut self, config: &RateLimitConfig) -> Result<(), RateLimited> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(f64::from(config.burst));
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let wait = if config.refill_rate > 0.0 {
            (1.0 - self.tokens) / config.refill_rate
        } else {
            f64::from(u32::MAX)
        };
        Err(RateLimited {
            retry_after: Duration::from_secs_f64(wait),
        })
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Spend one token for `identity`
    pub fn check(&self, identity: &str) -> Result<(), RateLimited> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut buckets = self.buckets.lock();
        buckets
            .entry(identity.to_string())
            .or_insert_with(|| Bucket::full(self.config.burst))
            .take(&self.config)
    }

    /// Forget buckets idle for longer than `max_age`; returns how many
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
        before - buckets.len()
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

    fn limiter(burst: u32, refill_rate: f64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            burst,
            refill_rate,
            enabled: true,
        })
    }

    #[test]
    fn test_allows_burst_then_limits() {
        let limiter = limiter(3, 1.0);
        for _ in 0..3 {
            assert!(limiter.check("alice").is_ok());
        }
        let limited = limiter.check("alice").unwrap_err();
        assert!(limited.retry_after <= Duration::from_secs(1));
        assert_eq!(limited.retry_after_secs(), 1);
    }

    #[test]
    fn test_identities_have_separate_buckets() {
        let limiter = limiter(1, 0.1);
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("bob").is_ok());
        assert!(limiter.check("alice").is_err());
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 1,
            refill_rate: 0.0,
            enabled: false,
        });
        for _ in 0..100 {
            assert!(limiter.check("anonymous").is_ok());
        }
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let limiter = limiter(2, 1.0);
        limiter.check("alice").unwrap();
        assert_eq!(limiter.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(limiter.cleanup(Duration::ZERO), 1);
    }
}
