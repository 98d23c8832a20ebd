// src/guard/rate_limit.rs
use std::collections::HashMap;
use std::sync::Mutex;

use crate::sync::now_ms;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitCfg {
    pub max_attempts: u32,
    pub window_ms: u64,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start_ms: u64,
}

/// Fixed-window limiter: the bucket resets entirely when the window elapses,
/// rather than sliding continuously. Ephemeral, process-lifetime only.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimitCfg,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitCfg) -> Self {
        Self {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_rate_limited(&self, identifier: &str) -> bool {
        self.is_rate_limited_at(identifier, now_ms())
    }

    /// Counts this call as an attempt. The first attempt in a window (or the
    /// first after the previous window fully elapsed) resets the bucket and
    /// passes; attempts beyond `max_attempts` within the window are limited.
    pub fn is_rate_limited_at(&self, identifier: &str, now_ms: u64) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limit lock poisoned");
        match buckets.get_mut(identifier) {
            Some(b) if now_ms.saturating_sub(b.window_start_ms) < self.cfg.window_ms => {
                b.count += 1;
                b.count > self.cfg.max_attempts
            }
            _ => {
                buckets.insert(
                    identifier.to_string(),
                    Bucket {
                        count: 1,
                        window_start_ms: now_ms,
                    },
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_after_max_attempts_within_window() {
        let rl = RateLimiter::new(RateLimitCfg::default());
        let t0 = 1_000_000u64;
        for i in 0..5 {
            assert!(!rl.is_rate_limited_at("ui", t0 + i), "call {} limited", i + 1);
        }
        assert!(rl.is_rate_limited_at("ui", t0 + 10));
    }

    #[test]
    fn window_elapse_resets_bucket() {
        let rl = RateLimiter::new(RateLimitCfg {
            max_attempts: 2,
            window_ms: 1_000,
        });
        let t0 = 50_000u64;
        assert!(!rl.is_rate_limited_at("ui", t0));
        assert!(!rl.is_rate_limited_at("ui", t0 + 1));
        assert!(rl.is_rate_limited_at("ui", t0 + 2));
        // Full window elapsed: fresh bucket.
        assert!(!rl.is_rate_limited_at("ui", t0 + 1_000));
    }

    #[test]
    fn identifiers_are_independent() {
        let rl = RateLimiter::new(RateLimitCfg {
            max_attempts: 1,
            window_ms: 1_000,
        });
        let t0 = 9_000u64;
        assert!(!rl.is_rate_limited_at("a", t0));
        assert!(rl.is_rate_limited_at("a", t0 + 1));
        assert!(!rl.is_rate_limited_at("b", t0 + 2));
    }
}
