//! Mocks shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hent::audio::SizeLimits;
use hent::config::{PodcastConfig, Settings};
use hent::download::{AudioFetcher, DownloadOrchestrator, FetchedAudio};
use hent::episode::Episode;
use hent::error::SourceError;
use hent::strategy::{Candidate, Strategy, StrategyChain, StrategyRegistry, SuccessHistory};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PODCAST: &str = "Founders";

pub fn episode(n: u32) -> Episode {
    Episode::new(
        PODCAST,
        format!("#{} Episode {}", n, n),
        Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap() + chrono::Duration::days(n as i64),
    )
    .with_audio_url(format!("https://cdn.example.com/{}.mp3", n))
}

/// Strategy returning URLs derived from the episode title, counting calls.
pub struct UrlStrategy {
    pub name: String,
    pub urls: Vec<String>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl UrlStrategy {
    pub fn new(name: &str, urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            urls: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for UrlStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, episode: &Episode, _: &PodcastConfig) -> hent::Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::TransientNetwork("connection reset".into()).into());
        }
        let slug = hent::episode::extract_episode_number(&episode.title);
        Ok(self
            .urls
            .iter()
            .map(|u| Candidate::new(u.replace("{n}", &slug), &self.name))
            .collect())
    }
}

/// Fetcher that succeeds for URLs in `good` (or any URL when `accept_any`),
/// optionally slowly, recording how many fetches overlap.
#[derive(Default)]
pub struct MockFetcher {
    pub good: HashSet<String>,
    pub accept_any: bool,
    pub delay: Option<Duration>,
    pub fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl MockFetcher {
    pub fn accepting(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            good: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            accept_any: true,
            ..Default::default()
        })
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetched.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl AudioFetcher for MockFetcher {
    fn handles(&self, _: &str) -> bool {
        true
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchedAudio, SourceError> {
        self.fetched.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !self.accept_any && !self.good.contains(url) {
            return Err(SourceError::PermanentSource(format!("HTTP 404 for {}", url)));
        }
        let mut bytes = b"ID3".to_vec();
        bytes.resize(20_000, 0);
        std::fs::write(dest, bytes).map_err(|e| SourceError::PermanentSource(e.to_string()))?;
        FetchedAudio::inspect(dest, SizeLimits::default())
    }
}

pub fn registry(strategies: Vec<Arc<UrlStrategy>>) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for s in strategies {
        registry.register(s);
    }
    registry
}

pub fn podcasts(chain: &[&str]) -> BTreeMap<String, PodcastConfig> {
    let config = PodcastConfig {
        primary_strategy: chain.first().map(|s| s.to_string()),
        fallback_strategies: chain.iter().skip(1).map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    BTreeMap::from([(PODCAST.to_string(), config)])
}

pub fn orchestrator(
    registry: StrategyRegistry,
    fetcher: Arc<MockFetcher>,
    settings: &Settings,
    audio_dir: &Path,
) -> Arc<DownloadOrchestrator> {
    let chain = StrategyChain::new(Arc::new(registry), Arc::new(SuccessHistory::in_memory()));
    let fetcher: Arc<dyn AudioFetcher> = fetcher;
    Arc::new(DownloadOrchestrator::new(chain, vec![fetcher], settings).with_audio_dir(audio_dir))
}

/// Like [`orchestrator`], autosaving to `state`.
pub fn autosaving_orchestrator(
    registry: StrategyRegistry,
    fetcher: Arc<MockFetcher>,
    settings: &Settings,
    audio_dir: &Path,
    state: &Path,
) -> Arc<DownloadOrchestrator> {
    let chain = StrategyChain::new(Arc::new(registry), Arc::new(SuccessHistory::in_memory()));
    let fetcher: Arc<dyn AudioFetcher> = fetcher;
    Arc::new(
        DownloadOrchestrator::new(chain, vec![fetcher], settings)
            .with_audio_dir(audio_dir)
            .with_state_file(state),
    )
}
