//! Sliding-window rate limiting for provider calls.
//!
//! The limiter keeps the admission time of every call inside the window.
//! Capacity is the provider's stated limit minus a safety buffer, so we
//! stay under the limit even when the provider counts slightly differently.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window rate limiter shared by all tasks calling one provider.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter for `max_requests` per `window`, holding back `safety_buffer`
    /// (0.1 = 10%) of the nominal capacity.
    pub fn new(name: impl Into<String>, max_requests: u32, window: Duration, safety_buffer: f64) -> Self {
        let buffer = safety_buffer.clamp(0.0, 0.99);
        let capacity = ((max_requests as f64) * (1.0 - buffer)).floor().max(1.0) as usize;

        Self {
            name: name.into(),
            capacity,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective capacity after the safety buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a call now, or return how long until the oldest admitted call expires.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();

        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        if admitted.len() < self.capacity {
            admitted.push_back(now);
            return Ok(());
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Wait until a call is admitted. Returns the total time waited.
    ///
    /// The lock is never held across the sleep.
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire() {
                Ok(()) => return waited,
                Err(wait) => {
                    debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Calls admitted within the current window.
    pub fn current_usage(&self) -> usize {
        let now = Instant::now();
        self.admitted
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
