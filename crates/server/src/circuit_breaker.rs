use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use decant_common::DecantError;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — all calls pass through.
    Closed,
    /// Breaker tripped — calls fail fast with `CIRCUIT_OPEN`.
    Open,
    /// Cooldown elapsed — a bounded number of probe calls are admitted.
    HalfOpen,
}

/// Thresholds governing a breaker's transitions.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing resumes.
    pub reset_timeout: Duration,
    /// Probes admitted (and consecutive successes required) in half-open.
    pub half_open_requests: u32,
}

impl BreakerConfig {
    /// 5 failures / 30 s / 2 probes.
    pub fn sensitive() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }

    /// 10 failures / 60 s / 3 probes — the registry default.
    pub fn standard() -> Self {
        Self {
            failure_threshold: 10,
            reset_timeout: Duration::from_secs(60),
            half_open_requests: 3,
        }
    }

    /// 20 failures / 120 s / 5 probes.
    pub fn tolerant() -> Self {
        Self {
            failure_threshold: 20,
            reset_timeout: Duration::from_secs(120),
            half_open_requests: 5,
        }
    }
}

/// A circuit breaker that opens after consecutive failures reach a
/// threshold and closes again after enough successful probes.
///
/// The open → half-open transition is taken lazily on the next admitted
/// call once the reset timeout has elapsed, so no timer is required for
/// correctness.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    total_requests: AtomicU64,
    /// Uses std::sync::Mutex because it is never held across await points.
    inner: Mutex<CircuitInner>,
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    state_changed_at: Instant,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            total_requests: AtomicU64::new(0),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                state_changed_at: Instant::now(),
            }),
        }
    }

    /// Admit or reject a call. Every call counts toward `total_requests`
    /// before any state check.
    pub fn try_acquire(&self) -> Result<(), DecantError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if inner.state_changed_at.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.state_changed_at = Instant::now();
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 1;
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker transitioning to half-open"
                    );
                    Ok(())
                } else {
                    metrics::counter!("circuit_breaker.rejections", "circuit" => self.name.clone())
                        .increment(1);
                    Err(DecantError::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_requests {
                    inner.half_open_in_flight += 1;
                    Ok(())
                } else {
                    metrics::counter!("circuit_breaker.rejections", "circuit" => self.name.clone())
                        .increment(1);
                    Err(DecantError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.half_open_requests {
                    tracing::info!(circuit = %self.name, "Circuit breaker closing after probes");
                    inner.state = CircuitState::Closed;
                    inner.state_changed_at = Instant::now();
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 0;
                    metrics::counter!("circuit_breaker.recoveries", "circuit" => self.name.clone())
                        .increment(1);
                }
            }
            CircuitState::Open => {
                // A success observed while open (call admitted just before
                // the trip) does not close the circuit.
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_successes = 0;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.state_changed_at = Instant::now();
                    metrics::counter!("circuit_breaker.trips", "circuit" => self.name.clone())
                        .increment(1);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(circuit = %self.name, "Probe failed — circuit breaker reopening");
                inner.state = CircuitState::Open;
                inner.state_changed_at = Instant::now();
                inner.half_open_in_flight = 0;
                metrics::counter!("circuit_breaker.trips", "circuit" => self.name.clone())
                    .increment(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` under this breaker: fail fast when open, record the
    /// outcome otherwise.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, DecantError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, DecantError>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Return to closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.state_changed_at = Instant::now();
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        tracing::info!(circuit = %self.name, "Circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of named circuit breakers shared by all outbound callers.
///
/// Process-wide state: constructed once in `main`, rebuilt per test.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the named breaker, creating it with the STANDARD preset.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, BreakerConfig::standard)
    }

    /// Fetch the named breaker, creating it with `config()` on first use.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: impl FnOnce() -> BreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::new(name, config()));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Reset every registered breaker to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().unwrap().values() {
            breaker.reset();
        }
    }

    /// Name of the first open breaker, if any.
    pub fn any_open(&self) -> Option<String> {
        self.breakers
            .lock()
            .unwrap()
            .values()
            .find(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
    }

    /// Emit gauge metrics for all breaker states.
    pub fn report_metrics(&self) {
        for breaker in self.breakers.lock().unwrap().values() {
            let state_value = match breaker.state() {
                CircuitState::Closed => 0.0,
                CircuitState::HalfOpen => 0.5,
                CircuitState::Open => 1.0,
            };
            metrics::gauge!("circuit_breaker.state", "circuit" => breaker.name().to_string())
                .set(state_value);
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(20),
            half_open_requests: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>(DecantError::Internal("boom".into())) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Ok::<_, DecantError>(()) }).await;
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Next call fails fast without invoking the op.
        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok::<_, DecantError>(()) }
            })
            .await;
        assert!(matches!(result, Err(DecantError::CircuitOpen(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;

        // First call after cooldown is a probe; its failure reopens.
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("test", fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_total_requests_counted_before_state_checks() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        // Rejected call still counts.
        let _ = breaker.call(|| async { Ok::<_, DecantError>(()) }).await;
        assert_eq!(breaker.total_requests(), 4);
    }

    #[tokio::test]
    async fn test_reset_returns_to_closed() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("llm");
        let b = registry.get_or_create("llm");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_registry_reset_all() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry.get_or_create_with("flaky", fast_config);
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(registry.any_open().as_deref(), Some("flaky"));

        registry.reset_all();
        assert!(registry.any_open().is_none());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_presets() {
        let registry = CircuitBreakerRegistry::new();
        let sensitive = registry.get_or_create_with("fragile", BreakerConfig::sensitive);
        assert_eq!(sensitive.config.failure_threshold, 5);
        let tolerant = registry.get_or_create_with("sturdy", BreakerConfig::tolerant);
        assert_eq!(tolerant.config.half_open_requests, 5);
    }
}
