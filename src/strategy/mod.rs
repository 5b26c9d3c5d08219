//! Strategy-chain resolution of audio sources.
//!
//! A strategy is one named way of finding candidate audio URLs for an
//! episode (a feed, a directory API, a page scrape, a search). Podcasts list
//! the strategies to use in configuration, and [`StrategyChain`] runs them in
//! order until one returns candidates.

mod apple;
mod direct;
mod discovery;
mod history;
mod itunes_search;
mod podcast_index;
mod rss;
mod web_scrape;
mod youtube;

pub use apple::{AppleLookup, ApplePodcastsStrategy};
pub use direct::DirectStrategy;
pub use discovery::FeedDiscovery;
pub use history::SuccessHistory;
pub use itunes_search::ItunesSearchStrategy;
pub use podcast_index::PodcastIndexStrategy;
pub use rss::{parse_feed, RssStrategy};
pub use web_scrape::WebScrapeStrategy;
pub use youtube::YoutubeSearchStrategy;

use crate::config::{PodcastConfig, Settings};
use crate::episode::{is_youtube_url, normalize_title, Episode};
use crate::error::{HentError, Result};
use crate::http::ResilientClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A URL that may serve the episode's audio, and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub strategy: String,
}

impl Candidate {
    pub fn new(url: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strategy: strategy.into(),
        }
    }
}

/// One named resolver.
///
/// Network and parse failures come back as [`HentError::Source`] and only
/// end this strategy. Configuration errors end the podcast.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate URLs for `episode`, best first. Empty when nothing was found.
    async fn resolve(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>>;
}

/// Strategies by name.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in strategy, sharing one HTTP client.
    pub fn standard(client: ResilientClient, settings: &Settings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirectStrategy));
        registry.register(Arc::new(RssStrategy::new(client.clone())));
        registry.register(Arc::new(ApplePodcastsStrategy::new(client.clone())));
        registry.register(Arc::new(PodcastIndexStrategy::new(
            client.clone(),
            settings.podcast_index.clone(),
        )));
        registry.register(Arc::new(WebScrapeStrategy::new(client.clone())));
        registry.register(Arc::new(ItunesSearchStrategy::new(client)));
        registry.register(Arc::new(YoutubeSearchStrategy::new(settings.youtube.clone())));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| HentError::UnknownStrategy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    /// Fail on the first name that is not registered.
    pub fn validate(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }
}

/// Result of running a chain: the strategy that answered and its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub strategy: String,
    pub candidates: Vec<Candidate>,
}

/// Ordered strategy execution with success history.
#[derive(Clone)]
pub struct StrategyChain {
    registry: Arc<StrategyRegistry>,
    history: Arc<SuccessHistory>,
}

impl StrategyChain {
    pub fn new(registry: Arc<StrategyRegistry>, history: Arc<SuccessHistory>) -> Self {
        Self { registry, history }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn history(&self) -> &SuccessHistory {
        &self.history
    }

    /// Strategy order for an episode.
    ///
    /// Recently successful strategies come first, then the configured chain.
    /// A YouTube audio URL puts `youtube_search` in front, and `skip_direct`
    /// drops `direct` wherever it came from.
    pub fn order_for(&self, episode: &Episode, podcast: &PodcastConfig) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let push = |name: String, order: &mut Vec<String>| {
            if !order.contains(&name) {
                order.push(name);
            }
        };

        if episode.audio_url.as_deref().is_some_and(is_youtube_url) {
            push(youtube::NAME.to_string(), &mut order);
        }
        for name in self.history.get(&episode.podcast) {
            if self.registry.contains(&name) {
                push(name, &mut order);
            }
        }
        for name in podcast.strategy_chain() {
            push(name, &mut order);
        }

        if podcast.skip_direct {
            order.retain(|s| s != direct::NAME);
        }
        order
    }

    /// Run one strategy by name.
    pub async fn resolve_one(
        &self,
        name: &str,
        episode: &Episode,
        podcast: &PodcastConfig,
    ) -> Result<Vec<Candidate>> {
        let strategy = self.registry.get(name)?;
        strategy.resolve(episode, podcast).await
    }

    /// Run `names` in order and return the first non-empty candidate list.
    ///
    /// Strategy failures are logged and skipped. Configuration errors stop
    /// the chain and are returned.
    #[instrument(skip(self, episode, podcast), fields(podcast = %episode.podcast, title = %episode.title))]
    pub async fn resolve(
        &self,
        names: &[String],
        episode: &Episode,
        podcast: &PodcastConfig,
    ) -> Result<Option<Resolution>> {
        for name in names {
            debug!(strategy = %name, "Trying strategy");
            match self.resolve_one(name, episode, podcast).await {
                Ok(candidates) if !candidates.is_empty() => {
                    info!(strategy = %name, count = candidates.len(), "Strategy found candidates");
                    return Ok(Some(Resolution {
                        strategy: name.clone(),
                        candidates,
                    }));
                }
                Ok(_) => debug!(strategy = %name, "Strategy found nothing"),
                Err(e) if e.is_config() => return Err(e),
                Err(e) => warn!(strategy = %name, error = %e, "Strategy failed"),
            }
        }
        Ok(None)
    }

    /// Remember that `strategy` produced working audio for `podcast`.
    pub fn record_success(&self, podcast: &str, strategy: &str) {
        self.history.record_success(podcast, strategy);
    }
}

/// Whether a source's title and date describe `episode`.
///
/// Titles are compared after normalization, and one may contain the other
/// (directories often prepend the show name). Dates may differ by one day.
pub(crate) fn same_episode(episode: &Episode, title: &str, published: Option<DateTime<Utc>>) -> bool {
    let wanted = normalize_title(&episode.title);
    let found = normalize_title(title);
    if wanted.is_empty() || found.is_empty() {
        return false;
    }

    let titles_match = wanted == found
        || (wanted.len() >= 12 && found.contains(&wanted))
        || (found.len() >= 12 && wanted.contains(&found));
    if !titles_match {
        return false;
    }

    match published {
        Some(date) => (date.date_naive() - episode.published_date()).num_days().abs() <= 1,
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strategy returning a fixed answer and counting calls.
    pub(crate) struct FixedStrategy {
        pub name: String,
        pub answer: std::result::Result<Vec<String>, String>,
        pub calls: AtomicUsize,
    }

    impl FixedStrategy {
        pub fn ok(name: &str, urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                answer: Ok(urls.iter().map(|u| u.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                answer: Err("feed timed out".to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Strategy for FixedStrategy {
        fn name(&self) -> &str {
            &self.name
        }

        async fn resolve(&self, _: &Episode, _: &PodcastConfig) -> Result<Vec<Candidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Ok(urls) => Ok(urls.iter().map(|u| Candidate::new(u, &self.name)).collect()),
                Err(msg) => Err(crate::error::SourceError::TransientNetwork(msg.clone()).into()),
            }
        }
    }

    pub(crate) fn episode() -> Episode {
        Episode::new(
            "Founders",
            "#380 Steve Jobs",
            Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap(),
        )
        .with_audio_url("https://cdn.example.com/380.mp3")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_config_error() {
        let chain = StrategyChain::new(Arc::new(StrategyRegistry::new()), Arc::new(SuccessHistory::in_memory()));
        let err = chain
            .resolve(&names(&["nope"]), &episode(), &PodcastConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_empty_strategy_falls_through() {
        let empty = FixedStrategy::ok("a", &[]);
        let found = FixedStrategy::ok("b", &["https://b/1.mp3"]);
        let mut registry = StrategyRegistry::new();
        registry.register(empty.clone());
        registry.register(found.clone());
        let chain = StrategyChain::new(Arc::new(registry), Arc::new(SuccessHistory::in_memory()));

        let resolution = chain
            .resolve(&names(&["a", "b"]), &episode(), &PodcastConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.strategy, "b");
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_order_puts_history_first_and_honours_skip_direct() {
        let mut registry = StrategyRegistry::new();
        for name in ["rss", "apple_podcasts", "direct", "youtube_search"] {
            registry.register(FixedStrategy::ok(name, &[]));
        }
        let history = Arc::new(SuccessHistory::in_memory());
        history.record_success("Founders", "apple_podcasts");
        let chain = StrategyChain::new(Arc::new(registry), history);

        let podcast = PodcastConfig {
            fallback_strategies: names(&["direct", "rss", "apple_podcasts"]),
            ..Default::default()
        };
        assert_eq!(
            chain.order_for(&episode(), &podcast),
            names(&["apple_podcasts", "direct", "rss"])
        );

        let skipping = PodcastConfig {
            skip_direct: true,
            ..podcast
        };
        let yt = episode().with_audio_url("https://www.youtube.com/watch?v=abc");
        assert_eq!(
            chain.order_for(&yt, &skipping),
            names(&["youtube_search", "apple_podcasts", "rss"])
        );
    }

    #[test]
    fn test_same_episode_tolerates_prefix_and_one_day() {
        let ep = episode();
        let next_day = Utc.with_ymd_and_hms(2025, 2, 11, 3, 0, 0).unwrap();
        assert!(same_episode(&ep, "#380: Steve Jobs", Some(next_day)));
        assert!(!same_episode(&ep, "#381 Steve Jobs", None));
        let later = Utc.with_ymd_and_hms(2025, 2, 14, 0, 0, 0).unwrap();
        assert!(!same_episode(&ep, "#380 Steve Jobs", Some(later)));
    }
}
