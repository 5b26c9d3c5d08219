//! Per-episode status, batch results and the resumable state snapshot.

use super::attempt::{Attempt, AttemptLedger};
use crate::audio::AudioFormat;
use crate::episode::Episode;
use crate::error::{HentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Retrying,
    Success,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Retrying => "retrying",
            DownloadStatus::Success => "success",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Download progress of one episode within a batch.
#[derive(Debug, Clone)]
pub struct EpisodeDownloadStatus {
    pub episode: Episode,
    pub status: DownloadStatus,
    pub ledger: AttemptLedger,
    pub audio_path: Option<PathBuf>,
    pub last_error: Option<String>,
    pub current_strategy: Option<String>,
    pub file_size: Option<u64>,
    pub audio_format: Option<AudioFormat>,
    /// Strategy that produced the audio.
    pub download_source: Option<String>,
    /// Publisher-reported duration.
    pub expected_duration: Option<String>,
}

impl EpisodeDownloadStatus {
    pub fn new(episode: Episode) -> Self {
        let expected_duration = episode.duration.clone();
        Self {
            episode,
            status: DownloadStatus::Pending,
            ledger: AttemptLedger::new(),
            audio_path: None,
            last_error: None,
            current_strategy: None,
            file_size: None,
            audio_format: None,
            download_source: None,
            expected_duration,
        }
    }

    pub fn key(&self) -> String {
        self.episode.state_key()
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }

    /// Multi-line description of the episode and every attempt.
    pub fn debug_info(&self) -> String {
        let mut out = format!(
            "{} | {} | {}\nstatus: {}\n",
            self.episode.podcast,
            self.episode.title,
            self.episode.published_date(),
            self.status
        );
        if let Some(path) = &self.audio_path {
            out.push_str(&format!("audio: {}\n", path.display()));
        }
        if let Some(source) = &self.download_source {
            out.push_str(&format!("source: {}\n", source));
        }
        if let Some(err) = &self.last_error {
            out.push_str(&format!("last error: {}\n", err));
        }
        out.push_str(&format!("attempts: {}\n", self.ledger.len()));
        for (i, attempt) in self.ledger.attempts().iter().enumerate() {
            let outcome = if attempt.success() {
                "ok".to_string()
            } else {
                attempt.error().unwrap_or("open").to_string()
            };
            let secs = attempt.duration().map(|d| d.as_secs_f64()).unwrap_or_default();
            out.push_str(&format!(
                "  {}. [{}] {} ({:.1}s) {}\n",
                i + 1,
                attempt.strategy,
                attempt.url,
                secs,
                outcome
            ));
        }
        out
    }
}

/// A podcast whose episodes were abandoned because of a configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFailure {
    pub podcast: String,
    pub error: String,
}

/// Outcome of one `download_batch` call, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub episodes: Vec<EpisodeDownloadStatus>,
    pub config_failures: Vec<ConfigFailure>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn succeeded(&self) -> impl Iterator<Item = &EpisodeDownloadStatus> {
        self.episodes.iter().filter(|s| s.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EpisodeDownloadStatus> {
        self.episodes
            .iter()
            .filter(|s| s.status == DownloadStatus::Failed)
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Local audio for the episode with `key`, if it downloaded.
    pub fn audio_path(&self, key: &str) -> Option<&Path> {
        self.episodes
            .iter()
            .find(|s| s.key() == key)
            .and_then(|s| s.audio_path.as_deref())
    }
}

/// Counts by status plus per-episode details.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub counts: BTreeMap<String, usize>,
    pub episodes: Vec<EpisodeDownloadStatus>,
}

impl StatusReport {
    pub fn from_statuses(mut episodes: Vec<EpisodeDownloadStatus>) -> Self {
        episodes.sort_by(|a, b| {
            a.episode
                .podcast
                .cmp(&b.episode.podcast)
                .then(b.episode.published.cmp(&a.episode.published))
        });
        let mut counts = BTreeMap::new();
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Retrying,
            DownloadStatus::Success,
            DownloadStatus::Failed,
        ] {
            counts.insert(status.to_string(), 0);
        }
        for s in &episodes {
            *counts.entry(s.status.to_string()).or_default() += 1;
        }
        Self { counts, episodes }
    }

    pub fn count(&self, status: DownloadStatus) -> usize {
        self.counts.get(&status.to_string()).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.episodes.len()
    }
}

/// Persisted attempt, as written to the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub url: String,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl From<&Attempt> for AttemptRecord {
    fn from(a: &Attempt) -> Self {
        Self {
            url: a.url.clone(),
            strategy: a.strategy.clone(),
            started_at: a.started_at,
            duration_seconds: a.duration().map(|d| d.as_secs_f64()).unwrap_or_default(),
            success: a.success(),
            error: a.error().map(|e| e.to_string()),
        }
    }
}

/// Persisted episode state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    pub status: DownloadStatus,
    pub attempts: Vec<AttemptRecord>,
    pub audio_path: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl From<&EpisodeDownloadStatus> for EpisodeRecord {
    fn from(s: &EpisodeDownloadStatus) -> Self {
        Self {
            status: s.status,
            attempts: s.ledger.attempts().iter().map(AttemptRecord::from).collect(),
            audio_path: s.audio_path.clone(),
            last_error: s.last_error.clone(),
        }
    }
}

impl EpisodeRecord {
    /// Attach this record to `episode`.
    ///
    /// An attempt left open by an interrupted run was never sealed, so it is
    /// restored as failed with an "interrupted" error. In-flight statuses
    /// fall back to pending.
    pub fn restore(self, episode: Episode) -> EpisodeDownloadStatus {
        let attempts = self
            .attempts
            .into_iter()
            .map(|r| {
                let error = match (r.success, r.error) {
                    (false, None) => Some("interrupted".to_string()),
                    (_, error) => error,
                };
                Attempt::restored(r.url, r.strategy, r.started_at, r.duration_seconds, r.success, error)
            })
            .collect();

        let status = match self.status {
            DownloadStatus::Downloading => DownloadStatus::Pending,
            other => other,
        };

        let mut restored = EpisodeDownloadStatus::new(episode);
        restored.status = status;
        restored.ledger = AttemptLedger::from_attempts(attempts);
        restored.audio_path = self.audio_path;
        restored.last_error = self.last_error;
        if status == DownloadStatus::Success {
            restored.download_source = restored.ledger.last().map(|a| a.strategy.clone());
        }
        restored
    }
}

/// State file contents, keyed by `Episode::state_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    pub episodes: BTreeMap<String, EpisodeRecord>,
}

impl StateSnapshot {
    pub fn capture<'a>(statuses: impl IntoIterator<Item = &'a EpisodeDownloadStatus>) -> Self {
        Self {
            episodes: statuses
                .into_iter()
                .map(|s| (s.key(), EpisodeRecord::from(s)))
                .collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| HentError::Snapshot(format!("{}: {}", path.display(), e)))
    }

    /// Write via a temporary file so a crash never leaves half a snapshot.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Autosaves from concurrent tasks each get their own temp file.
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Restore statuses for `episodes`. Keys with no matching episode are dropped.
    pub fn restore(mut self, episodes: &[Episode]) -> HashMap<String, EpisodeDownloadStatus> {
        episodes
            .iter()
            .filter_map(|episode| {
                let key = episode.state_key();
                self.episodes
                    .remove(&key)
                    .map(|record| (key, record.restore(episode.clone())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn episode(title: &str) -> Episode {
        Episode::new("Founders", title, Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut status = EpisodeDownloadStatus::new(episode("#380 Steve Jobs"));
        status.ledger.begin("https://a/380.mp3", "rss");
        status.ledger.seal(Err("HTTP 404".into()));
        status.status = DownloadStatus::Failed;
        status.last_error = Some("HTTP 404".into());

        let snapshot = StateSnapshot::capture([&status]);
        let json = serde_json::to_value(&snapshot).unwrap();
        let record = &json[status.key()];
        assert_eq!(record["status"], "failed");
        assert_eq!(record["lastError"], "HTTP 404");
        assert_eq!(record["attempts"][0]["strategy"], "rss");
        assert_eq!(record["attempts"][0]["success"], false);
        assert!(record["attempts"][0]["durationSeconds"].is_number());
        assert!(record["attempts"][0]["startedAt"].is_string());
    }

    #[test]
    fn test_restore_drops_unknown_identities() {
        let known = EpisodeDownloadStatus::new(episode("#380 Steve Jobs"));
        let gone = EpisodeDownloadStatus::new(episode("#1 Gone"));
        let snapshot = StateSnapshot::capture([&known, &gone]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        snapshot.write(&path).unwrap();

        let restored = StateSnapshot::read(&path)
            .unwrap()
            .restore(&[episode("#380 Steve Jobs"), episode("#381 New")]);
        assert_eq!(restored.len(), 1);
        assert!(restored.contains_key(&known.key()));
    }

    #[test]
    fn test_in_flight_status_restores_as_pending() {
        let mut status = EpisodeDownloadStatus::new(episode("#380 Steve Jobs"));
        status.status = DownloadStatus::Downloading;
        status.ledger.begin("https://a/380.mp3", "rss");
        let record = EpisodeRecord::from(&status);

        let restored = record.restore(episode("#380 Steve Jobs"));
        assert_eq!(restored.status, DownloadStatus::Pending);
        assert!(!restored.ledger.has_open());
        assert_eq!(restored.ledger.last_error(), Some("interrupted"));
    }

    #[test]
    fn test_report_counts() {
        let mut ok = EpisodeDownloadStatus::new(episode("a"));
        ok.status = DownloadStatus::Success;
        let pending = EpisodeDownloadStatus::new(episode("b"));
        let report = StatusReport::from_statuses(vec![ok, pending]);
        assert_eq!(report.total(), 2);
        assert_eq!(report.count(DownloadStatus::Success), 1);
        assert_eq!(report.count(DownloadStatus::Pending), 1);
        assert_eq!(report.count(DownloadStatus::Failed), 0);
    }
}
