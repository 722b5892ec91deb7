use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use decant_common::config::RateLimitConfig;

/// Which per-minute budget applies to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateClass {
    Global,
    Import,
    Settings,
}

impl RateClass {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Import => "import",
            Self::Settings => "settings",
        }
    }
}

/// Per-IP, per-class token buckets guarding the HTTP surface. A denied
/// request reports how many seconds until a token frees up.
pub struct ApiRateLimiter {
    buckets: Mutex<HashMap<(String, &'static str), TokenBucket>>,
    config: RateLimitConfig,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens per second.
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = Instant::now();
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn retry_after_seconds(&mut self) -> u64 {
        self.refill();
        if self.tokens >= 1.0 {
            0
        } else {
            ((1.0 - self.tokens) / self.rate).ceil() as u64
        }
    }
}

impl ApiRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Try to admit one request. `Err(retry_after_seconds)` on denial.
    pub fn check(&self, ip: &str, class: RateClass) -> Result<(), u64> {
        let budget = match class {
            RateClass::Global => self.config.global_per_minute,
            RateClass::Import => self.config.import_per_minute,
            RateClass::Settings => self.config.settings_per_minute,
        };

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry((ip.to_string(), class.as_str()))
            .or_insert_with(|| TokenBucket::new(budget));

        if bucket.try_acquire() {
            Ok(())
        } else {
            metrics::counter!("http.rate_limit.rejections", "class" => class.as_str())
                .increment(1);
            Err(bucket.retry_after_seconds().max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: u32, import: u32, settings: u32) -> ApiRateLimiter {
        ApiRateLimiter::new(RateLimitConfig {
            global_per_minute: global,
            import_per_minute: import,
            settings_per_minute: settings,
        })
    }

    #[test]
    fn test_budget_then_429() {
        let limiter = limiter(100, 3, 5);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4", RateClass::Import).is_ok());
        }
        // The (max+1)-th request in the window is denied with a wait.
        let retry_after = limiter.check("1.2.3.4", RateClass::Import).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = limiter(100, 1, 5);
        assert!(limiter.check("1.1.1.1", RateClass::Import).is_ok());
        assert!(limiter.check("2.2.2.2", RateClass::Import).is_ok());
        assert!(limiter.check("1.1.1.1", RateClass::Import).is_err());
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = limiter(100, 1, 1);
        assert!(limiter.check("1.1.1.1", RateClass::Import).is_ok());
        assert!(limiter.check("1.1.1.1", RateClass::Settings).is_ok());
    }
}
