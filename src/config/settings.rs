//! Configuration settings for Hent.

use crate::error::{HentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Chain used when a podcast names no strategies of its own.
pub const DEFAULT_STRATEGY_CHAIN: &[&str] = &["rss", "apple_podcasts", "web_scrape", "itunes_search"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub download: DownloadSettings,
    pub resilience: ResilienceSettings,
    pub cache: CacheSettings,
    pub podcast_index: PodcastIndexSettings,
    pub youtube: YoutubeSettings,
    /// Per-podcast retrieval configuration, keyed by podcast name.
    pub podcasts: BTreeMap<String, PodcastConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Directory where downloaded audio is kept.
    pub audio_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// How far back discovery looks for new episodes.
    pub days_back: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.hent".to_string(),
            temp_dir: "/tmp/hent".to_string(),
            audio_dir: "~/.hent/audio".to_string(),
            log_level: "info".to_string(),
            days_back: 7,
        }
    }
}

/// Download orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Maximum episodes downloading at once.
    pub concurrency: usize,
    /// Wall-clock budget for all sources of one episode.
    pub episode_timeout_seconds: u64,
    /// Budget for podcasts flagged with `extended_timeout`.
    pub extended_timeout_seconds: u64,
    /// Timeout for a single HTTP request.
    pub request_timeout_seconds: u64,
    /// Smallest body accepted as audio.
    pub min_audio_bytes: u64,
    /// Largest body accepted as audio.
    pub max_audio_bytes: u64,
    /// User agent presented to podcast hosts.
    pub user_agent: String,
    /// Where batch state snapshots are written.
    pub state_file: String,
    /// Run the title/channel search after every other source failed.
    pub fallback_search: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            episode_timeout_seconds: 1800,
            extended_timeout_seconds: 3600,
            request_timeout_seconds: 60,
            min_audio_bytes: 10_000,
            max_audio_bytes: 500_000_000,
            user_agent: "Podcasts/1580.1 CFNetwork/1408.0.4 Darwin/22.5.0".to_string(),
            state_file: "~/.hent/download_state.json".to_string(),
            fallback_search: true,
        }
    }
}

/// Rate limiting, circuit breaking and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Provider's stated request limit per window.
    pub requests_per_window: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Fraction of the stated capacity held back (0.1 = use 90%).
    pub safety_buffer: f64,
    /// Generic failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds before a generically-opened breaker allows a trial call.
    pub recovery_timeout_seconds: u64,
    /// Rate-limit failures before the breaker opens.
    pub rate_limit_threshold: u32,
    /// Seconds before a rate-limit-opened breaker allows a trial call.
    pub rate_limit_recovery_seconds: u64,
    /// Attempts per network call, including the first.
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            requests_per_window: 50,
            window_seconds: 60,
            safety_buffer: 0.1,
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            rate_limit_threshold: 3,
            rate_limit_recovery_seconds: 300,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Transcript cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
    /// Allow the podcast+title match that ignores the published date.
    pub title_only_match: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.hent/episodes.db".to_string(),
            title_only_match: true,
        }
    }
}

/// Podcast Index API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PodcastIndexSettings {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl PodcastIndexSettings {
    /// Resolve credentials from config, falling back to the environment.
    pub fn credentials(&self) -> Option<(String, String)> {
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("PODCASTINDEX_API_KEY").ok())?;
        let secret = self
            .api_secret
            .clone()
            .or_else(|| std::env::var("PODCASTINDEX_API_SECRET").ok())?;
        if key.is_empty() || secret.is_empty() {
            return None;
        }
        Some((key, secret))
    }
}

/// YouTube-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    /// yt-dlp executable.
    pub ytdlp_path: String,
    /// Results requested from a YouTube search.
    pub search_results: u32,
    /// Netscape-format cookie jar passed to yt-dlp; skipped when missing.
    pub cookies_file: Option<String>,
    /// Browsers yt-dlp may borrow cookies from, tried after the cookie file.
    pub cookies_from_browser: Vec<String>,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            search_results: 3,
            cookies_file: None,
            cookies_from_browser: Vec::new(),
        }
    }
}

/// Retrieval configuration for one podcast.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PodcastConfig {
    /// RSS feeds, tried in order.
    pub rss_feeds: Vec<String>,
    /// Apple Podcasts collection id.
    pub apple_id: Option<String>,
    /// Podcast website, used for page scraping.
    pub website: Option<String>,
    /// YouTube channel name used to narrow searches.
    pub youtube_channel: Option<String>,
    /// First strategy of the chain.
    pub primary_strategy: Option<String>,
    /// Strategies tried after the primary one.
    pub fallback_strategies: Vec<String>,
    /// Strategies tried before the chain for hosts known to need them.
    pub priority_strategies: Vec<String>,
    /// Never fetch the publisher's enclosure URL directly.
    pub skip_direct: bool,
    /// Use the extended per-episode timeout.
    pub extended_timeout: bool,
}

impl PodcastConfig {
    /// Ordered strategy names for this podcast.
    pub fn strategy_chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        if let Some(primary) = &self.primary_strategy {
            chain.push(primary.clone());
        }
        for name in &self.fallback_strategies {
            if !chain.contains(name) {
                chain.push(name.clone());
            }
        }
        if chain.is_empty() {
            chain = DEFAULT_STRATEGY_CHAIN.iter().map(|s| s.to_string()).collect();
        }
        if self.skip_direct {
            chain.retain(|s| s != "direct");
        }
        chain
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(HentError::Config("download.concurrency must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.resilience.safety_buffer) {
            return Err(HentError::Config(format!(
                "resilience.safety_buffer must be in [0, 1), got {}",
                self.resilience.safety_buffer
            )));
        }
        if self.resilience.retry_max_attempts == 0 {
            return Err(HentError::Config("resilience.retry_max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| HentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hent")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    pub fn audio_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.audio_dir)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.cache.sqlite_path)
    }

    pub fn state_file(&self) -> PathBuf {
        Self::expand_path(&self.download.state_file)
    }

    /// Where strategy success history is persisted.
    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join("strategy_history.json")
    }

    /// Configuration for a podcast, or the defaults when it is not listed.
    pub fn podcast(&self, name: &str) -> PodcastConfig {
        self.podcasts.get(name).cloned().unwrap_or_default()
    }

    /// Per-episode budget for a podcast.
    pub fn episode_timeout(&self, podcast: &PodcastConfig) -> Duration {
        if podcast.extended_timeout {
            Duration::from_secs(self.download.extended_timeout_seconds)
        } else {
            Duration::from_secs(self.download.episode_timeout_seconds)
        }
    }
}
