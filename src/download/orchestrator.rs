//! Bounded-concurrency batch downloads with an attempt ledger per episode.

use super::fetch::{AudioFetcher, BrowserFetcher, FallbackSearch, FetchedAudio};
use super::status::{
    BatchResult, ConfigFailure, DownloadStatus, EpisodeDownloadStatus, StateSnapshot, StatusReport,
};
use crate::audio::SizeLimits;
use crate::cache::Mode;
use crate::config::{PodcastConfig, Settings};
use crate::episode::{audio_filename, Episode};
use crate::error::{Result, SourceError};
use crate::strategy::{Candidate, StrategyChain};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Ledger label for an existing valid file.
pub const CACHED_FILE: &str = "cached_file";
/// Ledger label for operator-supplied URLs.
pub const MANUAL: &str = "manual";
/// Ledger label for browser downloads.
pub const BROWSER: &str = "browser_automation";
/// Ledger label for the URL found at discovery time.
pub const ORIGINAL_URL: &str = "original_url";

/// Called with a copy of an episode's status on every change.
pub type ProgressCallback = Arc<dyn Fn(&EpisodeDownloadStatus) + Send + Sync>;

enum Outcome {
    Downloaded,
    Exhausted,
    Cancelled,
    Config(String),
}

/// Downloads batches of episodes.
///
/// Every collaborator is injected: the strategy chain (which carries the
/// shared provider guards through its HTTP client), the fetchers, and the
/// optional browser and fallback search.
pub struct DownloadOrchestrator {
    chain: StrategyChain,
    fetchers: Vec<Arc<dyn AudioFetcher>>,
    browser: Option<Arc<dyn BrowserFetcher>>,
    fallback: Option<Arc<dyn FallbackSearch>>,
    settings: Settings,
    audio_dir: PathBuf,
    limits: SizeLimits,
    semaphore: Arc<Semaphore>,
    statuses: Mutex<HashMap<String, EpisodeDownloadStatus>>,
    manual_urls: Mutex<HashMap<String, String>>,
    browser_requests: Mutex<HashSet<String>>,
    failed_podcasts: Mutex<HashMap<String, String>>,
    cancelled: AtomicBool,
    progress: Option<ProgressCallback>,
    state_path: Option<PathBuf>,
}

impl DownloadOrchestrator {
    pub fn new(chain: StrategyChain, fetchers: Vec<Arc<dyn AudioFetcher>>, settings: &Settings) -> Self {
        Self {
            chain,
            fetchers,
            browser: None,
            fallback: None,
            audio_dir: settings.audio_dir(),
            limits: SizeLimits {
                min_bytes: settings.download.min_audio_bytes,
                max_bytes: settings.download.max_audio_bytes,
            },
            semaphore: Arc::new(Semaphore::new(settings.download.concurrency.max(1))),
            settings: settings.clone(),
            statuses: Mutex::new(HashMap::new()),
            manual_urls: Mutex::new(HashMap::new()),
            browser_requests: Mutex::new(HashSet::new()),
            failed_podcasts: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
            progress: None,
            state_path: None,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserFetcher>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSearch>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Save a snapshot to `path` after every finished episode.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn with_audio_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audio_dir = dir.into();
        self
    }

    /// Queue a URL to try first for the episode with `key`.
    pub fn add_manual_url(&self, key: &str, url: impl Into<String>) {
        let url = url.into();
        info!(episode = key, url = %url, "Manual URL queued");
        self.manual_urls.lock().insert(key.to_string(), url);
    }

    /// Queue a browser download for the episode with `key`.
    pub fn request_browser_download(&self, key: &str) {
        info!(episode = key, "Browser download queued");
        self.browser_requests.lock().insert(key.to_string());
    }

    /// Stop starting new attempts and episodes. Running attempts finish.
    pub fn cancel(&self) {
        warn!("Download batch cancelled");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Download every episode, at most `concurrency` at a time.
    ///
    /// Episodes already downloaded (in this run or a restored snapshot) are
    /// skipped. A podcast with an invalid strategy configuration fails only
    /// its own episodes.
    #[instrument(skip_all, fields(episodes = episodes.len(), mode = %mode))]
    pub async fn download_batch(
        self: &Arc<Self>,
        episodes: Vec<Episode>,
        podcasts: &BTreeMap<String, PodcastConfig>,
        mode: Mode,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        let configs = self.validate_podcasts(&episodes, podcasts, &mut result);

        if let Err(e) = std::fs::create_dir_all(&self.audio_dir) {
            warn!("Cannot create audio directory {:?}: {}", self.audio_dir, e);
        }

        let mut tasks = JoinSet::new();
        for episode in &episodes {
            let key = episode.state_key();
            {
                let mut statuses = self.statuses.lock();
                let entry = statuses
                    .entry(key.clone())
                    .or_insert_with(|| EpisodeDownloadStatus::new(episode.clone()));
                if entry.is_success() {
                    debug!(episode = %key, "Already downloaded, skipping");
                    continue;
                }
            }

            let Some(config) = configs.get(&episode.podcast).cloned() else {
                let error = self.podcast_failure(&episode.podcast).unwrap_or_default();
                self.fail_without_attempts(episode, error);
                continue;
            };

            let this = Arc::clone(self);
            let episode = episode.clone();
            let semaphore = Arc::clone(&self.semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if this.is_cancelled() {
                    return;
                }
                let run = AssertUnwindSafe(this.download_episode(episode.clone(), &config, mode));
                if run.catch_unwind().await.is_err() {
                    error!(episode = %episode.state_key(), "Episode task panicked");
                    this.fail_without_attempts(&episode, "episode task panicked".into());
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Episode task did not complete: {}", e);
            }
        }

        self.autosave();

        let statuses = self.statuses.lock();
        result.episodes = episodes
            .iter()
            .filter_map(|e| statuses.get(&e.state_key()).cloned())
            .collect();
        result.cancelled = self.is_cancelled();
        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "Batch finished"
        );
        result
    }

    /// Check every podcast's strategy names once per batch.
    fn validate_podcasts(
        &self,
        episodes: &[Episode],
        podcasts: &BTreeMap<String, PodcastConfig>,
        result: &mut BatchResult,
    ) -> HashMap<String, PodcastConfig> {
        self.failed_podcasts.lock().clear();
        let mut configs = HashMap::new();
        for episode in episodes {
            let name = &episode.podcast;
            if configs.contains_key(name) || self.podcast_failure(name).is_some() {
                continue;
            }
            let config = podcasts.get(name).cloned().unwrap_or_default();
            let mut names = config.priority_strategies.clone();
            names.extend(config.strategy_chain());

            match self.chain.registry().validate(&names) {
                Ok(()) => {
                    configs.insert(name.clone(), config);
                }
                Err(e) => {
                    error!(podcast = %name, error = %e, "Invalid podcast configuration");
                    self.failed_podcasts.lock().insert(name.clone(), e.to_string());
                    result.config_failures.push(ConfigFailure {
                        podcast: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        configs
    }

    fn podcast_failure(&self, podcast: &str) -> Option<String> {
        self.failed_podcasts.lock().get(podcast).cloned()
    }

    fn fail_without_attempts(&self, episode: &Episode, error: String) {
        let key = episode.state_key();
        let mut status = self
            .statuses
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| EpisodeDownloadStatus::new(episode.clone()));
        status.status = DownloadStatus::Failed;
        status.last_error = Some(error);
        status.current_strategy = None;
        self.publish(&status);
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast, title = %episode.title))]
    async fn download_episode(&self, episode: Episode, config: &PodcastConfig, mode: Mode) {
        if let Some(error) = self.podcast_failure(&episode.podcast) {
            self.fail_without_attempts(&episode, error);
            return;
        }

        let key = episode.state_key();
        let mut status = self
            .statuses
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| EpisodeDownloadStatus::new(episode.clone()));
        status.status = match status.status {
            DownloadStatus::Pending => DownloadStatus::Downloading,
            _ => DownloadStatus::Retrying,
        };
        status.episode = episode;
        status.last_error = None;
        self.publish(&status);

        let budget = self.settings.episode_timeout(config);
        let dest = self.audio_dir.join(audio_filename(&status.episode, mode));
        let outcome = tokio::time::timeout(budget, self.try_sources(&mut status, config, &dest)).await;

        match outcome {
            Ok(Outcome::Downloaded) => {}
            Ok(Outcome::Exhausted) => {
                status.status = DownloadStatus::Failed;
                status.last_error = status
                    .ledger
                    .last_error()
                    .map(|e| e.to_string())
                    .or(status.last_error.take())
                    .or_else(|| Some("no audio source found".into()));
                warn!(attempts = status.ledger.len(), "All sources exhausted");
            }
            Ok(Outcome::Cancelled) => {
                status.status = DownloadStatus::Pending;
                status.last_error = Some(SourceError::Cancelled.to_string());
            }
            Ok(Outcome::Config(error)) => {
                error!(error = %error, "Configuration error, abandoning podcast");
                self.failed_podcasts
                    .lock()
                    .insert(status.episode.podcast.clone(), error.clone());
                status.status = DownloadStatus::Failed;
                status.last_error = Some(error);
            }
            Err(_) => {
                let message = format!("episode timed out after {}s", budget.as_secs());
                warn!("{}", message);
                status.ledger.seal(Err(message.clone()));
                let _ = std::fs::remove_file(dest.with_extension("part"));
                status.status = DownloadStatus::Failed;
                status.last_error = Some(message);
            }
        }

        status.current_strategy = None;
        self.publish(&status);
        self.autosave();
    }

    /// Try every source in order until one yields valid audio.
    async fn try_sources(
        &self,
        status: &mut EpisodeDownloadStatus,
        config: &PodcastConfig,
        dest: &Path,
    ) -> Outcome {
        if let Ok(audio) = FetchedAudio::inspect(dest, self.limits) {
            status.ledger.begin(dest.display().to_string(), CACHED_FILE);
            status.ledger.seal(Ok(()));
            self.succeed(status, audio, CACHED_FILE);
            return Outcome::Downloaded;
        }

        // Ledgers restored from a snapshot may repeat URLs; each pass tries a URL once.
        let mut tried = HashSet::new();
        let key = status.key();
        let manual = self.manual_urls.lock().remove(&key);
        if let Some(url) = manual {
            if self.try_candidate(status, &Candidate::new(url, MANUAL), dest, &mut tried).await {
                return Outcome::Downloaded;
            }
        }

        let browser_requested = self.browser_requests.lock().remove(&key);
        if browser_requested && self.try_browser(status, dest).await {
            return Outcome::Downloaded;
        }

        let mut names = config.priority_strategies.clone();
        for name in self.chain.order_for(&status.episode, config) {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        for name in names {
            if self.is_cancelled() {
                return Outcome::Cancelled;
            }
            status.current_strategy = Some(name.clone());
            self.publish(status);

            let candidates = match self.chain.resolve_one(&name, &status.episode, config).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_config() => return Outcome::Config(e.to_string()),
                Err(e) => {
                    warn!(strategy = %name, error = %e, "Strategy failed");
                    status.last_error = Some(format!("{}: {}", name, e));
                    continue;
                }
            };

            for candidate in candidates {
                if self.is_cancelled() {
                    return Outcome::Cancelled;
                }
                if self.try_candidate(status, &candidate, dest, &mut tried).await {
                    self.chain.record_success(&status.episode.podcast, &name);
                    return Outcome::Downloaded;
                }
            }
        }

        if !config.skip_direct {
            if let Some(url) = status.episode.audio_url.clone() {
                if self.is_cancelled() {
                    return Outcome::Cancelled;
                }
                if self.try_candidate(status, &Candidate::new(url, ORIGINAL_URL), dest, &mut tried).await {
                    return Outcome::Downloaded;
                }
            }
        }

        if let (true, Some(fallback)) = (self.settings.download.fallback_search, &self.fallback) {
            match fallback.search(&status.episode, config).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        if self.is_cancelled() {
                            return Outcome::Cancelled;
                        }
                        if self.try_candidate(status, &candidate, dest, &mut tried).await {
                            return Outcome::Downloaded;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Fallback search failed"),
            }
        }

        Outcome::Exhausted
    }

    /// Attempt one candidate. Returns true when it produced valid audio.
    async fn try_candidate(
        &self,
        status: &mut EpisodeDownloadStatus,
        candidate: &Candidate,
        dest: &Path,
        tried: &mut HashSet<String>,
    ) -> bool {
        if !tried.insert(candidate.url.clone()) {
            debug!(url = %candidate.url, "Already tried, skipping");
            return false;
        }

        status.ledger.begin(&candidate.url, &candidate.strategy);
        status.current_strategy = Some(candidate.strategy.clone());
        self.publish(status);

        let Some(fetcher) = self.fetchers.iter().find(|f| f.handles(&candidate.url)) else {
            let message = format!("no fetcher for {}", candidate.url);
            status.ledger.seal(Err(message.clone()));
            status.last_error = Some(message);
            self.publish(status);
            return false;
        };

        match fetcher.fetch(&candidate.url, dest).await {
            Ok(audio) => {
                status.ledger.seal(Ok(()));
                self.succeed(status, audio, &candidate.strategy);
                true
            }
            Err(e) => {
                let message = e.to_string();
                debug!(url = %candidate.url, strategy = %candidate.strategy, error = %message, "Attempt failed");
                status.ledger.seal(Err(message.clone()));
                status.last_error = Some(message);
                self.publish(status);
                false
            }
        }
    }

    async fn try_browser(&self, status: &mut EpisodeDownloadStatus, dest: &Path) -> bool {
        let url = status
            .episode
            .link
            .clone()
            .or_else(|| status.episode.audio_url.clone())
            .unwrap_or_else(|| format!("browser:{}", status.key()));

        status.ledger.begin(&url, BROWSER);
        status.current_strategy = Some(BROWSER.to_string());
        self.publish(status);

        let result = match &self.browser {
            Some(browser) => browser.fetch_via_browser(&url, dest).await.and_then(|path| {
                if path != dest {
                    std::fs::rename(&path, dest).map_err(|e| {
                        SourceError::PermanentSource(format!("cannot move browser download: {}", e))
                    })?;
                }
                FetchedAudio::inspect(dest, self.limits)
            }),
            None => Err(SourceError::PermanentSource(
                "no browser fetcher configured".into(),
            )),
        };

        match result {
            Ok(audio) => {
                status.ledger.seal(Ok(()));
                self.succeed(status, audio, BROWSER);
                true
            }
            Err(e) => {
                status.ledger.seal(Err(e.to_string()));
                status.last_error = Some(e.to_string());
                self.publish(status);
                false
            }
        }
    }

    fn succeed(&self, status: &mut EpisodeDownloadStatus, audio: FetchedAudio, strategy: &str) {
        info!(path = %audio.path.display(), strategy, bytes = audio.bytes, "Audio downloaded");
        status.status = DownloadStatus::Success;
        status.audio_path = Some(audio.path);
        status.file_size = Some(audio.bytes);
        status.audio_format = Some(audio.format);
        status.download_source = Some(strategy.to_string());
        status.last_error = None;
        status.current_strategy = None;
        self.publish(status);
    }

    fn publish(&self, status: &EpisodeDownloadStatus) {
        self.statuses.lock().insert(status.key(), status.clone());
        if let Some(callback) = &self.progress {
            callback(status);
        }
    }

    fn autosave(&self) {
        if let Some(path) = &self.state_path {
            if let Err(e) = self.save_state(path) {
                warn!("Failed to save download state to {:?}: {}", path, e);
            }
        }
    }

    /// Write every known episode's status and ledger to `path`.
    pub fn save_state(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let statuses = self.statuses.lock();
            StateSnapshot::capture(statuses.values())
        };
        snapshot.write(path)?;
        debug!(path = %path.display(), episodes = snapshot.episodes.len(), "Saved download state");
        Ok(())
    }

    /// Restore statuses for `episodes` from `path`. Returns how many matched.
    pub fn load_state(&self, path: &Path, episodes: &[Episode]) -> Result<usize> {
        let restored = StateSnapshot::read(path)?.restore(episodes);
        let count = restored.len();
        self.statuses.lock().extend(restored);
        info!(path = %path.display(), restored = count, "Loaded download state");
        Ok(count)
    }

    /// Counts by status and per-episode details.
    pub fn status(&self) -> StatusReport {
        StatusReport::from_statuses(self.statuses.lock().values().cloned().collect())
    }

    pub fn episode_status(&self, key: &str) -> Option<EpisodeDownloadStatus> {
        self.statuses.lock().get(key).cloned()
    }

    pub fn debug_info(&self, key: &str) -> Option<String> {
        self.statuses.lock().get(key).map(|s| s.debug_info())
    }

    /// Mark failed episodes for another pass. Empty `keys` means all failed.
    pub fn retry_failed(&self, keys: &[String]) -> usize {
        let flipped: Vec<EpisodeDownloadStatus> = {
            let mut statuses = self.statuses.lock();
            statuses
                .iter_mut()
                .filter(|(key, s)| s.status == DownloadStatus::Failed && (keys.is_empty() || keys.contains(key)))
                .map(|(_, s)| {
                    s.status = DownloadStatus::Retrying;
                    s.clone()
                })
                .collect()
        };
        if let Some(callback) = &self.progress {
            for status in &flipped {
                callback(status);
            }
        }
        info!(count = flipped.len(), "Episodes queued for retry");
        flipped.len()
    }
}
