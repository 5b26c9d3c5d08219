//! Resilience primitives shared by every network call.
//!
//! Each provider (a host or a named API) gets one [`ProviderGuard`] bundling
//! a rate limiter, a circuit breaker and a retry policy. Guards are created
//! on first use and shared by all concurrent episode tasks through [`Guards`].

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};

use crate::config::ResilienceSettings;
use crate::error::SourceError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter, breaker and retry policy for one provider.
#[derive(Debug)]
pub struct ProviderGuard {
    pub limiter: RateLimiter,
    pub breaker: CircuitBreaker,
    pub retry: RetryPolicy,
}

impl ProviderGuard {
    pub fn new(name: &str, settings: &ResilienceSettings) -> Self {
        Self {
            limiter: RateLimiter::new(
                name,
                settings.requests_per_window,
                Duration::from_secs(settings.window_seconds),
                settings.safety_buffer,
            ),
            breaker: CircuitBreaker::new(name, breaker_config(settings)),
            retry: RetryPolicy::from_settings(settings),
        }
    }

    /// Run `op` with retry around (rate limit, then breaker, then call).
    ///
    /// Each retry pays the rate limiter again and is seen by the breaker, so
    /// a sustained run of 429s opens the breaker and stops the retries.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        retry_with_backoff(&self.retry, label, || {
            let fut = op();
            async move {
                let permit = self.breaker.check()?;
                self.limiter.acquire().await;
                let result = fut.await;
                permit.settle(&result);
                result
            }
        })
        .await
    }
}

fn breaker_config(settings: &ResilienceSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        recovery_timeout: Duration::from_secs(settings.recovery_timeout_seconds),
        rate_limit_threshold: settings.rate_limit_threshold,
        rate_limit_recovery: Duration::from_secs(settings.rate_limit_recovery_seconds),
    }
}

/// Registry of provider guards, keyed by provider name.
#[derive(Debug)]
pub struct Guards {
    settings: ResilienceSettings,
    guards: RwLock<HashMap<String, Arc<ProviderGuard>>>,
}

impl Guards {
    pub fn new(settings: ResilienceSettings) -> Self {
        Self {
            settings,
            guards: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the guard for a provider.
    pub fn get(&self, provider: &str) -> Arc<ProviderGuard> {
        {
            let guards = self.guards.read();
            if let Some(guard) = guards.get(provider) {
                return guard.clone();
            }
        }

        let mut guards = self.guards.write();
        guards
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderGuard::new(provider, &self.settings)))
            .clone()
    }

    /// Guard for the host serving `url`.
    pub fn for_url(&self, url: &str) -> Arc<ProviderGuard> {
        self.get(&provider_for_url(url))
    }

    /// Current breaker state of every known provider, sorted by name.
    pub fn breaker_states(&self) -> Vec<(String, CircuitState)> {
        let guards = self.guards.read();
        let mut states: Vec<_> = guards
            .iter()
            .map(|(name, guard)| (name.clone(), guard.breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for Guards {
    fn default() -> Self {
        Self::new(ResilienceSettings::default())
    }
}

/// Provider key for a URL: its host without a leading `www.`.
pub fn provider_for_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_guards_are_shared_per_provider() {
        let guards = Guards::default();
        let a = guards.for_url("https://www.example.com/feed.xml");
        let b = guards.get("example.com");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(guards.breaker_states().len(), 1);
    }

    #[test]
    fn test_provider_for_url() {
        assert_eq!(provider_for_url("https://traffic.libsyn.com/x.mp3"), "traffic.libsyn.com");
        assert_eq!(provider_for_url("not a url"), "unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_limits_open_breaker_and_stop_retries() {
        let settings = ResilienceSettings {
            retry_max_attempts: 10,
            ..Default::default()
        };
        let guard = ProviderGuard::new("api", &settings);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = guard
            .run("search", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::RateLimited {
                    message: "429".into(),
                    retry_after: None,
                })
            })
            .await;

        assert!(matches!(result, Err(SourceError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_trial_does_not_wedge_provider() {
        let settings = ResilienceSettings {
            failure_threshold: 1,
            ..Default::default()
        };
        let guard = ProviderGuard::new("cdn", &settings);
        guard
            .breaker
            .record_failure(&SourceError::TransientNetwork("reset".into()));
        tokio::time::advance(Duration::from_secs(settings.recovery_timeout_seconds + 1)).await;

        let stalled = guard.run("episode", || std::future::pending::<Result<(), SourceError>>());
        assert!(tokio::time::timeout(Duration::from_secs(5), stalled).await.is_err());

        tokio::time::advance(Duration::from_secs(24 * 3600)).await;
        let later = guard.run("episode", || async { Ok::<_, SourceError>(()) }).await;
        assert!(later.is_ok());
        assert_eq!(guard.breaker.state(), CircuitState::Closed);
    }
}
