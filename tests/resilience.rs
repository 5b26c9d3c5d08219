//! Circuit breaker behaviour through the public API.

use hent::error::SourceError;
use hent::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn too_many_requests() -> SourceError {
    SourceError::RateLimited {
        message: "HTTP 429".into(),
        retry_after: None,
    }
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_on_sustained_429s_and_closes_after_trial() {
    let breaker = CircuitBreaker::new(
        "itunes.apple.com",
        CircuitBreakerConfig {
            rate_limit_threshold: 3,
            rate_limit_recovery: Duration::from_secs(300),
            ..Default::default()
        },
    );
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result: Result<(), _> = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(too_many_requests())
            })
            .await;
        assert!(result.unwrap_err().is_rate_limit());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected: Result<(), _> = breaker
        .call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(rejected, Err(SourceError::CircuitOpen(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Still open just before the rate-limit recovery elapses.
    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(breaker.check().is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(2)).await;
    let trial = breaker
        .call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("audio")
        })
        .await;
    assert_eq!(trial.unwrap(), "audio");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_counts(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_sets_the_open_duration() {
    let breaker = CircuitBreaker::new("api.podcastindex.org", CircuitBreakerConfig::default());
    for _ in 0..3 {
        breaker.record_failure(&SourceError::RateLimited {
            message: "HTTP 429".into(),
            retry_after: Some(Duration::from_secs(10)),
        });
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(11)).await;
    let trial = breaker.check().unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // Only one trial is admitted while half-open.
    assert!(matches!(breaker.check(), Err(SourceError::CircuitOpen(_))));

    trial.failure(&too_many_requests());
    assert_eq!(breaker.state(), CircuitState::Open);
}
