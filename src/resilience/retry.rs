//! Retry with exponential backoff and jitter.

use crate::config::ResilienceSettings;
use crate::error::SourceError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters for one class of calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter applied in both directions (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            jitter: 0.25,
        }
    }

    /// Policy that never waits. Used by tests and one-shot calls.
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Un-jittered delay after the zero-based `attempt`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay after `attempt`, jittered. A provider `Retry-After` wins.
    pub fn delay_for(&self, attempt: u32, error: &SourceError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint;
        }

        let delay = self.base_delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        // Uniform in [1 - jitter, 1 + jitter]
        let spread = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
        delay.mul_f64((1.0 + spread).max(0.0))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= policy.max_attempts {
                    if attempt > 1 {
                        warn!(call = label, attempts = attempt, error = %e, "Giving up after retries");
                    }
                    return Err(e);
                }

                let delay = policy.delay_for(attempt - 1, &e);
                debug!(
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
        };
        assert_eq!(policy.base_delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::default();
        let err = SourceError::TransientNetwork("x".into());
        for _ in 0..200 {
            let d = policy.delay_for(2, &err);
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(5), "{:?}", d);
        }
    }

    #[test]
    fn test_retry_after_preferred() {
        let policy = RetryPolicy::default();
        let err = SourceError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(42)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), "feed", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::TransientNetwork(format!("failure {}", n)))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), SourceError::TransientNetwork("failure 2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), "feed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::PermanentSource("404".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::default(), "feed", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::TransientNetwork("reset".into()))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
