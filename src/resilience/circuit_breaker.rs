//! Circuit breaker with separate generic and rate-limit failure tracking.

use crate::error::SourceError;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting calls until the recovery timeout elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

/// Thresholds and recovery timeouts.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Generic failures before opening.
    pub failure_threshold: u32,
    /// Open duration after generic failures.
    pub recovery_timeout: Duration,
    /// Rate-limit failures before opening.
    pub rate_limit_threshold: u32,
    /// Open duration after rate-limit failures. Much longer than the generic one.
    pub rate_limit_recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            rate_limit_threshold: 3,
            rate_limit_recovery: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    rate_limit_failures: u32,
    last_failure: Option<Instant>,
    /// Recovery timeout chosen when the breaker last opened.
    open_for: Duration,
    trial_in_flight: bool,
}

/// Guards one call site. Shared by every task using that site.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                rate_limit_failures: 0,
                last_failure: None,
                open_for: Duration::ZERO,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without performing the open -> half-open transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// (generic failures, rate-limit failures).
    pub fn failure_counts(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.failures, inner.rate_limit_failures)
    }

    /// Admission check performed before every call.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open
    /// and admits exactly one trial call. The returned permit settles the
    /// call; a trial permit dropped unsettled reopens the breaker.
    pub fn check(&self) -> Result<BreakerPermit<'_>, SourceError> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed < inner.open_for {
                    return Err(SourceError::CircuitOpen(self.name.clone()));
                }
                inner.state = CircuitState::HalfOpen;
                debug!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(SourceError::CircuitOpen(self.name.clone()));
                }
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// A trial that never reported back counts as failed.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            inner.last_failure = Some(Instant::now());
            warn!(breaker = %self.name, "Trial call abandoned, circuit breaker reopened");
        }
    }

    /// Record a call that reached the provider and got a usable answer.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit breaker closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.rate_limit_failures = 0;
        inner.trial_in_flight = false;
    }

    /// Record a failed call.
    pub fn record_failure(&self, error: &SourceError) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_failure = Some(now);
        inner.trial_in_flight = false;

        let rate_limited = error.is_rate_limit();
        if rate_limited {
            inner.rate_limit_failures += 1;
        } else {
            inner.failures += 1;
        }

        // A Retry-After hint replaces the configured rate-limit recovery.
        let recovery = if rate_limited {
            error.retry_after().unwrap_or(self.config.rate_limit_recovery)
        } else {
            self.config.recovery_timeout
        };

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.open_for = recovery;
                warn!(breaker = %self.name, error = %error, "Trial call failed, circuit breaker reopened");
            }
            CircuitState::Closed => {
                let tripped = inner.rate_limit_failures >= self.config.rate_limit_threshold
                    || inner.failures >= self.config.failure_threshold;
                if tripped {
                    inner.state = CircuitState::Open;
                    inner.open_for = recovery;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        rate_limit_failures = inner.rate_limit_failures,
                        open_secs = recovery.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` through the breaker.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let permit = self.check()?;
        let result = f().await;
        permit.settle(&result);
        result
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        self.record_success();
    }
}

/// Admission granted by [`CircuitBreaker::check`].
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure).
#[must_use = "an unsettled trial permit reopens the breaker when dropped"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self, error: &SourceError) {
        self.settled = true;
        self.breaker.record_failure(error);
    }

    /// Only transient and rate-limit errors count against the provider. A
    /// 404 or a bad payload means the provider answered, so it counts as a
    /// healthy round trip.
    pub fn settle<T>(self, result: &Result<T, SourceError>) {
        match result {
            Err(e) if e.is_retryable() => self.failure(e),
            _ => self.success(),
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> SourceError {
        SourceError::RateLimited {
            message: "429".into(),
            retry_after: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_failures_open_breaker() {
        let breaker = CircuitBreaker::new("feed", CircuitBreakerConfig::default());

        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(SourceError::TransientNetwork("reset".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = breaker.call(|| async { Ok::<_, SourceError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_counts(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_do_not_trip() {
        let breaker = CircuitBreaker::new("feed", CircuitBreakerConfig::default());
        for _ in 0..10 {
            let _ = breaker
                .call(|| async { Err::<(), _>(SourceError::PermanentSource("404".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("feed", config);
        let _ = breaker
            .call(|| async { Err::<(), _>(SourceError::TransientNetwork("x".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = breaker
            .call(|| async { Err::<(), _>(SourceError::TransientNetwork("x".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SourceError>(())
            })
            .await;
        assert!(matches!(result, Err(SourceError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("feed", config);
        breaker.record_failure(&SourceError::TransientNetwork("x".into()));

        tokio::time::advance(Duration::from_secs(61)).await;
        let trial = breaker.check().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(breaker.check(), Err(SourceError::CircuitOpen(_))));
        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens_then_recovers() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("cdn", config);
        breaker.record_failure(&SourceError::TransientNetwork("x".into()));
        tokio::time::advance(Duration::from_secs(61)).await;

        let hung = breaker.call(|| std::future::pending::<Result<(), SourceError>>());
        assert!(tokio::time::timeout(Duration::from_secs(5), hung).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = breaker.call(|| async { Ok::<_, SourceError>("audio") }).await;
        assert_eq!(result.unwrap(), "audio");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_rate_limit_recovery() {
        let config = CircuitBreakerConfig {
            rate_limit_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("api", config);
        breaker.record_failure(&SourceError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(20)),
        });

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(breaker.check().is_err());
        tokio::time::advance(Duration::from_secs(2)).await;
        breaker.check().unwrap().success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_counter_is_independent() {
        let breaker = CircuitBreaker::new("api", CircuitBreakerConfig::default());
        breaker.record_failure(&rate_limited());
        breaker.record_failure(&SourceError::TransientNetwork("x".into()));
        assert_eq!(breaker.failure_counts(), (1, 1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
