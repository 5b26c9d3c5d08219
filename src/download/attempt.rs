//! Append-only record of download attempts.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One try of one URL by one strategy.
///
/// An attempt is opened before the URL is fetched and sealed exactly once
/// afterwards. Sealed attempts do not change.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub url: String,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    success: bool,
    error: Option<String>,
}

impl Attempt {
    pub fn start(url: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strategy: strategy.into(),
            started_at: Utc::now(),
            ended_at: None,
            success: false,
            error: None,
        }
    }

    /// Rebuild a sealed attempt from persisted fields.
    pub fn restored(
        url: String,
        strategy: String,
        started_at: DateTime<Utc>,
        duration_seconds: f64,
        success: bool,
        error: Option<String>,
    ) -> Self {
        let millis = (duration_seconds.max(0.0) * 1000.0).round() as i64;
        Self {
            url,
            strategy,
            started_at,
            ended_at: Some(started_at + chrono::Duration::milliseconds(millis)),
            success,
            error,
        }
    }

    /// Seal the attempt. Returns false if it was already sealed.
    pub fn complete(&mut self, success: bool, error: Option<String>) -> bool {
        if self.ended_at.is_some() {
            return false;
        }
        self.ended_at = Some(Utc::now());
        self.success = success;
        self.error = if success { None } else { error };
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Time between start and seal; `None` while open.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .map(|end| (end - self.started_at).to_std().unwrap_or_default())
    }
}

/// Ordered attempts for one episode. Only the newest attempt may be open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptLedger {
    attempts: Vec<Attempt>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_attempts(attempts: Vec<Attempt>) -> Self {
        Self { attempts }
    }

    /// Open an attempt for `url`.
    ///
    /// An attempt still open at this point is sealed as abandoned first.
    pub fn begin(&mut self, url: impl Into<String>, strategy: impl Into<String>) {
        if let Some(open) = self.open_mut() {
            open.complete(false, Some("abandoned".into()));
        }
        self.attempts.push(Attempt::start(url, strategy));
    }

    /// Seal the open attempt with the outcome. No-op when none is open.
    pub fn seal(&mut self, outcome: Result<(), String>) -> bool {
        match self.open_mut() {
            Some(open) => match outcome {
                Ok(()) => open.complete(true, None),
                Err(e) => open.complete(false, Some(e)),
            },
            None => false,
        }
    }

    fn open_mut(&mut self) -> Option<&mut Attempt> {
        self.attempts.last_mut().filter(|a| !a.is_sealed())
    }

    pub fn has_open(&self) -> bool {
        self.attempts.last().is_some_and(|a| !a.is_sealed())
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Error of the most recent failed attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.error())
    }
}
