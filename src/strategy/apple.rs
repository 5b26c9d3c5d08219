//! Apple Podcasts (iTunes lookup API) strategy.

use super::{parse_feed, same_episode, Candidate, Strategy};
use crate::config::PodcastConfig;
use crate::episode::Episode;
use crate::error::{Result, SourceError};
use crate::http::ResilientClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

pub(crate) const NAME: &str = "apple_podcasts";

const LOOKUP_URL: &str = "https://itunes.apple.com/lookup";
const SEARCH_URL: &str = "https://itunes.apple.com/search";

#[derive(Debug, Deserialize)]
struct ItunesResponse {
    #[serde(default)]
    results: Vec<ItunesItem>,
}

/// One result of the iTunes lookup or search API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItunesItem {
    pub kind: Option<String>,
    pub wrapper_type: Option<String>,
    pub collection_id: Option<u64>,
    pub collection_name: Option<String>,
    pub track_id: Option<u64>,
    pub track_name: Option<String>,
    pub episode_url: Option<String>,
    pub episode_guid: Option<String>,
    pub release_date: Option<String>,
    pub track_time_millis: Option<u64>,
    pub description: Option<String>,
    pub track_view_url: Option<String>,
    pub feed_url: Option<String>,
}

impl ItunesItem {
    pub fn is_episode(&self) -> bool {
        self.kind.as_deref() == Some("podcast-episode")
            || self.wrapper_type.as_deref() == Some("podcastEpisode")
    }

    pub fn released(&self) -> Option<DateTime<Utc>> {
        self.release_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    /// Convert an episode result. Returns `None` without a title or date.
    pub fn to_episode(&self, podcast: &str) -> Option<Episode> {
        let title = self.track_name.as_deref()?.trim();
        let mut episode = Episode::new(podcast, title, self.released()?);
        episode.audio_url = self.episode_url.clone();
        episode.description = self.description.clone();
        episode.link = self.track_view_url.clone();
        episode.duration = self.track_time_millis.map(|ms| {
            let secs = ms / 1000;
            format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        });
        episode.guid = self
            .episode_guid
            .clone()
            .or_else(|| self.track_id.map(|id| format!("apple-{}", id)));
        episode.apple_podcast_id = self.collection_id.map(|id| id.to_string());
        Some(episode)
    }
}

/// Thin client for the iTunes lookup and search endpoints.
#[derive(Clone)]
pub struct AppleLookup {
    client: ResilientClient,
}

impl AppleLookup {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    async fn query(&self, base: &str, params: &[(&str, &str)]) -> std::result::Result<Vec<ItunesItem>, SourceError> {
        let url = Url::parse_with_params(base, params)
            .map_err(|e| SourceError::PermanentSource(format!("bad iTunes URL: {}", e)))?;
        let response: ItunesResponse = self.client.get_json(url.as_str(), &[]).await?;
        Ok(response.results)
    }

    /// Latest episodes of a collection.
    pub async fn episodes(&self, apple_id: &str) -> std::result::Result<Vec<ItunesItem>, SourceError> {
        let items = self
            .query(
                LOOKUP_URL,
                &[("id", apple_id), ("entity", "podcastEpisode"), ("limit", "200")],
            )
            .await?;
        Ok(items.into_iter().filter(|i| i.is_episode()).collect())
    }

    /// The collection's public feed URL.
    pub async fn feed_url(&self, apple_id: &str) -> std::result::Result<Option<String>, SourceError> {
        let items = self
            .query(LOOKUP_URL, &[("id", apple_id), ("entity", "podcast")])
            .await?;
        Ok(items.into_iter().find_map(|i| i.feed_url))
    }

    /// Collection id of the podcast whose name matches best.
    pub async fn find_collection(&self, podcast: &str) -> std::result::Result<Option<String>, SourceError> {
        let items = self
            .query(
                SEARCH_URL,
                &[("term", podcast), ("media", "podcast"), ("entity", "podcast"), ("limit", "5")],
            )
            .await?;
        let wanted = podcast.to_lowercase();
        let best = items
            .iter()
            .find(|i| i.collection_name.as_deref().map(str::to_lowercase).as_deref() == Some(wanted.as_str()))
            .or_else(|| items.first());
        Ok(best.and_then(|i| i.collection_id).map(|id| id.to_string()))
    }

    /// Free-text episode search.
    pub async fn search_episodes(&self, term: &str, limit: u32) -> std::result::Result<Vec<ItunesItem>, SourceError> {
        let limit = limit.to_string();
        let items = self
            .query(
                SEARCH_URL,
                &[("term", term), ("media", "podcast"), ("entity", "podcastEpisode"), ("limit", limit.as_str())],
            )
            .await?;
        Ok(items.into_iter().filter(|i| i.is_episode()).collect())
    }
}

/// Resolves the episode through its Apple Podcasts listing.
///
/// Uses the episode's own `episodeUrl` when Apple has one, then falls back
/// to the public feed Apple records for the collection.
pub struct ApplePodcastsStrategy {
    lookup: AppleLookup,
}

impl ApplePodcastsStrategy {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            lookup: AppleLookup::new(client),
        }
    }
}

#[async_trait]
impl Strategy for ApplePodcastsStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        let apple_id = match podcast.apple_id.clone().or_else(|| episode.apple_podcast_id.clone()) {
            Some(id) => id,
            None => match self.lookup.find_collection(&episode.podcast).await? {
                Some(id) => id,
                None => return Ok(Vec::new()),
            },
        };

        let items = self.lookup.episodes(&apple_id).await?;
        let mut candidates: Vec<Candidate> = items
            .iter()
            .filter(|i| same_episode(episode, i.track_name.as_deref().unwrap_or_default(), i.released()))
            .filter_map(|i| i.episode_url.clone())
            .map(|url| Candidate::new(url, NAME))
            .collect();

        if candidates.is_empty() {
            if let Some(feed) = self.lookup.feed_url(&apple_id).await? {
                debug!(feed = %feed, "Falling back to Apple-listed feed");
                let body = self.lookup.client.get_text(&feed).await?;
                let entries = parse_feed(&episode.podcast, body.as_bytes())?;
                candidates = entries
                    .iter()
                    .filter(|e| same_episode(episode, &e.title, Some(e.published)))
                    .filter_map(|e| e.audio_url.clone())
                    .map(|url| Candidate::new(url, NAME))
                    .collect();
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_to_episode() {
        let json = r##"{
            "resultCount": 2,
            "results": [
                {"wrapperType": "track", "kind": "podcast", "collectionId": 1234, "collectionName": "Founders"},
                {"wrapperType": "podcastEpisode", "kind": "podcast-episode", "collectionId": 1234,
                 "trackId": 99, "trackName": "#380 Steve Jobs",
                 "episodeUrl": "https://cdn.example.com/380.mp3",
                 "releaseDate": "2025-02-10T12:00:00Z", "trackTimeMillis": 5400000}
            ]
        }"##;
        let response: ItunesResponse = serde_json::from_str(json).unwrap();
        let episodes: Vec<_> = response.results.iter().filter(|i| i.is_episode()).collect();
        assert_eq!(episodes.len(), 1);

        let ep = episodes[0].to_episode("Founders").unwrap();
        assert_eq!(ep.guid.as_deref(), Some("apple-99"));
        assert_eq!(ep.apple_podcast_id.as_deref(), Some("1234"));
        assert_eq!(ep.duration.as_deref(), Some("1:30:00"));
        assert_eq!(ep.published_date().to_string(), "2025-02-10");
    }
}
