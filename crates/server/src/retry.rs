use std::future::Future;
use std::time::Duration;

use decant_common::DecantError;

/// Upstream HTTP statuses that warrant another attempt.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Transport-level failure indicators matched against error text.
pub const NETWORK_ERROR_INDICATORS: [&str; 9] = [
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "ECONNREFUSED",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "socket hang up",
    "connection reset",
    "operation timed out",
];

/// Backoff parameters for [`with_retry`].
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Uniform jitter is drawn from `[0, jitter_factor × base_delay)`.
    pub jitter_factor: f64,
    /// Extra caller-supplied substrings that force a retry when matched
    /// against the error text.
    pub retry_on: Vec<String>,
}

impl RetryPolicy {
    /// Low-latency operations: 3 attempts, 200 ms base.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.3,
            retry_on: Vec::new(),
        }
    }

    /// Default for outbound service calls: 3 attempts, 1 s base.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.3,
            retry_on: Vec::new(),
        }
    }

    /// Slow upstreams: 5 attempts, 2 s base, 60 s cap.
    pub fn patient() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.3,
            retry_on: Vec::new(),
        }
    }

    /// Rate-limited APIs: long waits, and retry forced on rate-limit
    /// phrasing regardless of the error's own classification.
    pub fn rate_limit() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 5_000,
            max_delay_ms: 120_000,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.3,
            retry_on: vec![
                "429".to_string(),
                "Too Many Requests".to_string(),
                "Rate limit".to_string(),
            ],
        }
    }

    /// Base delay before the retry following the `n`-th failed attempt
    /// (0-indexed), jitter included.
    fn delay_for(&self, n: u32) -> Duration {
        let base = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(n as i32))
            .min(self.max_delay_ms as f64) as u64;
        let jitter = if self.jitter {
            let bound = (self.jitter_factor * base as f64) as u64;
            uniform_jitter(n, bound)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    fn matches_substring(&self, message: &str) -> bool {
        self.retry_on.iter().any(|s| message.contains(s.as_str()))
    }
}

/// Uniform jitter in `[0, bound)` derived from the clock and attempt
/// counter, hash-based to avoid a dedicated RNG dependency.
fn uniform_jitter(attempt: u32, bound: u64) -> u64 {
    if bound == 0 {
        return 0;
    }
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % bound
}

/// Classification hooks the retry loop consults on each failure.
pub trait RetryClass {
    fn is_retryable(&self) -> bool;

    /// Upstream-mandated minimum wait, when one was communicated.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryClass for DecantError {
    fn is_retryable(&self) -> bool {
        // An open breaker must end the retry loop immediately — retrying
        // cannot bypass it.
        if matches!(self, DecantError::CircuitOpen(_)) {
            return false;
        }
        if let Some(status) = self.upstream_status() {
            if RETRYABLE_STATUSES.contains(&status) {
                return true;
            }
        }
        let message = self.to_string();
        NETWORK_ERROR_INDICATORS
            .iter()
            .any(|ind| message.contains(ind))
    }

    fn retry_after(&self) -> Option<Duration> {
        DecantError::retry_after(self).map(Duration::from_secs)
    }
}

/// Run `op` up to `policy.max_attempts` times with exponential backoff.
///
/// A terminal (non-retryable, non-substring-matched) error is returned
/// immediately; exhausting attempts returns the last error. When the
/// error carries a `Retry-After`, the wait is the maximum of the
/// calculated backoff and the upstream's demand.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, target: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClass + std::fmt::Display,
{
    with_retry_observed(policy, target, op, |_, _| {}).await
}

/// [`with_retry`] with an `on_retry(attempt, error)` hook invoked before
/// each sleep. The hook sees attempt numbers starting at 1.
pub async fn with_retry_observed<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    target: &str,
    mut op: F,
    mut on_retry: H,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClass + std::fmt::Display,
    H: FnMut(u32, &E),
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                let retryable = e.is_retryable() || policy.matches_substring(&e.to_string());

                if !retryable || attempt >= policy.max_attempts {
                    if retryable {
                        metrics::counter!("retry.exhausted", "target" => target.to_string())
                            .increment(1);
                    }
                    return Err(e);
                }

                let mut delay = policy.delay_for(attempt - 1);
                if let Some(demanded) = e.retry_after() {
                    delay = delay.max(demanded);
                }

                on_retry(attempt, &e);
                metrics::counter!("retry.attempts", "target" => target.to_string()).increment(1);
                tracing::warn!(
                    target_name = target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Parse a `Retry-After` header value: either delta-seconds or an
/// HTTP-date. Returns whole seconds.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.num_seconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
        message: String,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.message)
        }
    }

    impl RetryClass for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
            jitter_factor: 0.0,
            retry_on: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_kth_attempt_with_k_minus_one_retries() {
        let mut calls = 0u32;
        let mut retries = 0u32;
        let result: Result<u32, TestError> = with_retry_observed(
            &quick_policy(),
            "test",
            || {
                calls += 1;
                let ok = calls >= 3;
                async move {
                    if ok {
                        Ok(42)
                    } else {
                        Err(TestError {
                            retryable: true,
                            message: "transient".into(),
                        })
                    }
                }
            },
            |_, _| retries += 1,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_terminal_error_returns_immediately() {
        let mut calls = 0u32;
        let result: Result<(), TestError> = with_retry(&quick_policy(), "test", || {
            calls += 1;
            async {
                Err(TestError {
                    retryable: false,
                    message: "bad request".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_substring_list_forces_retry() {
        let mut policy = quick_policy();
        policy.retry_on = vec!["Rate limit".into()];
        policy.max_attempts = 3;

        let mut calls = 0u32;
        let result: Result<(), TestError> = with_retry(&policy, "test", || {
            calls += 1;
            async {
                Err(TestError {
                    retryable: false,
                    message: "Rate limit exceeded".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let mut policy = quick_policy();
        policy.max_attempts = 2;

        let mut calls = 0u32;
        let result: Result<(), TestError> = with_retry(&policy, "test", || {
            calls += 1;
            let n = calls;
            async move {
                Err(TestError {
                    retryable: true,
                    message: format!("failure #{}", n),
                })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().message, "failure #2");
    }

    #[test]
    fn test_decant_error_retry_classification() {
        let retryable = DecantError::FetchFailed {
            message: "upstream".into(),
            status: Some(503),
            retry_after: None,
        };
        assert!(RetryClass::is_retryable(&retryable));

        let network = DecantError::ExtractionFailed("ECONNRESET by peer".into());
        assert!(RetryClass::is_retryable(&network));

        let terminal = DecantError::InvalidApiKey("youtube".into());
        assert!(!RetryClass::is_retryable(&terminal));

        let circuit = DecantError::CircuitOpen("llm".into());
        assert!(!RetryClass::is_retryable(&circuit));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Some(30));
        assert_eq!(parse_retry_after(" 5 "), Some(5));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(90);
        let parsed = parse_retry_after(&future.to_rfc2822()).unwrap();
        assert!(parsed >= 85 && parsed <= 90, "parsed = {}", parsed);
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 4_000,
            backoff_multiplier: 2.0,
            jitter: false,
            jitter_factor: 0.0,
            retry_on: Vec::new(),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4_000));
    }
}
