//! Episode discovery from feeds and the Apple Podcasts listing.

use super::{same_episode, AppleLookup, RssStrategy};
use crate::config::PodcastConfig;
use crate::episode::Episode;
use crate::error::Result;
use crate::http::ResilientClient;
use crate::pipeline::Discovery;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

/// Discovers recent episodes from the configured feeds, enriched with
/// Apple Podcasts data (collection id, and audio when a feed lacks it).
pub struct FeedDiscovery {
    rss: RssStrategy,
    apple: AppleLookup,
}

impl FeedDiscovery {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            rss: RssStrategy::new(client.clone()),
            apple: AppleLookup::new(client),
        }
    }
}

/// Fold Apple results into feed results.
///
/// An Apple episode matching a feed episode only attaches its collection id
/// (and audio URL when the feed had none). Unmatched ones are added.
fn merge(mut episodes: Vec<Episode>, apple: Vec<Episode>) -> Vec<Episode> {
    for candidate in apple {
        let existing = episodes
            .iter_mut()
            .find(|e| same_episode(e, &candidate.title, Some(candidate.published)));
        match existing {
            Some(episode) => {
                if let Some(id) = &candidate.apple_podcast_id {
                    episode.attach_apple_id(id.clone());
                }
                if episode.audio_url.is_none() {
                    if let Some(url) = &candidate.audio_url {
                        episode.attach_audio_url(url.clone());
                    }
                }
            }
            None => episodes.push(candidate),
        }
    }
    episodes
}

#[async_trait]
impl Discovery for FeedDiscovery {
    #[instrument(skip(self, config))]
    async fn fetch_candidate_episodes(
        &self,
        podcast: &str,
        config: &PodcastConfig,
        days_back: u32,
    ) -> Result<Vec<Episode>> {
        let cutoff = Utc::now() - Duration::days(days_back as i64);

        let mut from_feeds: Vec<Episode> = Vec::new();
        for feed in &config.rss_feeds {
            match self.rss.fetch_feed(podcast, feed).await {
                Ok(entries) => {
                    from_feeds.extend(entries.into_iter().filter(|e| e.published >= cutoff));
                    break;
                }
                Err(e) => warn!(feed = %feed, error = %e, "Feed unavailable, trying next"),
            }
        }

        let apple_id = match &config.apple_id {
            Some(id) => Some(id.clone()),
            None if config.rss_feeds.is_empty() => self.apple.find_collection(podcast).await.ok().flatten(),
            None => None,
        };

        let mut from_apple = Vec::new();
        if let Some(id) = apple_id {
            match self.apple.episodes(&id).await {
                Ok(items) => {
                    from_apple = items
                        .iter()
                        .filter_map(|i| i.to_episode(podcast))
                        .filter(|e| e.published >= cutoff)
                        .collect();
                }
                Err(e) => warn!(apple_id = %id, error = %e, "Apple lookup failed"),
            }
        }

        let mut episodes = merge(from_feeds, from_apple);
        episodes.sort_by(|a, b| b.published.cmp(&a.published));
        info!(podcast, count = episodes.len(), "Discovered episodes");
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::episode;

    #[test]
    fn test_merge_attaches_apple_id_without_duplicating() {
        let mut feed_ep = episode();
        feed_ep.audio_url = None;

        let mut apple_ep = episode();
        apple_ep.attach_apple_id("1234");
        apple_ep.attach_audio_url("https://apple.example.com/380.mp3");

        let mut other = episode();
        other.title = "#381 Henry Ford".into();

        let merged = merge(vec![feed_ep], vec![apple_ep, other]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].apple_podcast_id.as_deref(), Some("1234"));
        assert_eq!(merged[0].audio_url.as_deref(), Some("https://apple.example.com/380.mp3"));
    }
}
