//! Podcast Index API strategy.

use super::{same_episode, Candidate, Strategy};
use crate::config::{PodcastConfig, PodcastIndexSettings};
use crate::episode::Episode;
use crate::error::{HentError, Result, SourceError};
use crate::http::ResilientClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};
use url::Url;

pub(crate) const NAME: &str = "podcast_index";

const BASE_URL: &str = "https://api.podcastindex.org/api/1.0";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    feeds: Vec<Feed>,
}

#[derive(Debug, Deserialize)]
struct Feed {
    id: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct EpisodesResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    #[serde(default)]
    title: String,
    enclosure_url: Option<String>,
    date_published: Option<i64>,
}

/// Authentication headers: key, request time, and SHA-1 of key + secret + time.
pub(crate) fn auth_headers(key: &str, secret: &str, unix_time: i64) -> Vec<(&'static str, String)> {
    let time = unix_time.to_string();
    let digest = Sha1::digest(format!("{}{}{}", key, secret, time).as_bytes());
    vec![
        ("X-Auth-Key", key.to_string()),
        ("X-Auth-Date", time),
        ("Authorization", hex::encode(digest)),
    ]
}

/// Finds the podcast by name, then the episode among its latest items.
pub struct PodcastIndexStrategy {
    client: ResilientClient,
    settings: PodcastIndexSettings,
}

impl PodcastIndexStrategy {
    pub fn new(client: ResilientClient, settings: PodcastIndexSettings) -> Self {
        Self { client, settings }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        credentials: &(String, String),
    ) -> std::result::Result<T, SourceError> {
        let url = Url::parse_with_params(&format!("{}/{}", BASE_URL, path), params)
            .map_err(|e| SourceError::PermanentSource(format!("bad Podcast Index URL: {}", e)))?;
        let headers = auth_headers(&credentials.0, &credentials.1, Utc::now().timestamp());
        self.client.get_json(url.as_str(), &headers).await
    }
}

#[async_trait]
impl Strategy for PodcastIndexStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, _podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        let credentials = self.settings.credentials().ok_or_else(|| {
            HentError::MissingCredential(
                "podcast_index.api_key and podcast_index.api_secret (or PODCASTINDEX_API_KEY/SECRET)".into(),
            )
        })?;

        let search: SearchResponse = self
            .get("search/byterm", &[("q", episode.podcast.as_str()), ("max", "5")], &credentials)
            .await?;

        let wanted = episode.podcast.to_lowercase();
        let Some(feed) = search
            .feeds
            .iter()
            .find(|f| f.title.to_lowercase().contains(&wanted))
            .or_else(|| search.feeds.first())
        else {
            return Ok(Vec::new());
        };
        debug!(feed_id = feed.id, title = %feed.title, "Found feed in Podcast Index");

        let feed_id = feed.id.to_string();
        let episodes: EpisodesResponse = self
            .get("episodes/byfeedid", &[("id", feed_id.as_str()), ("max", "100")], &credentials)
            .await?;

        Ok(episodes
            .items
            .iter()
            .filter(|i| {
                let published = i.date_published.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
                same_episode(episode, &i.title, published)
            })
            .filter_map(|i| i.enclosure_url.clone())
            .map(|url| Candidate::new(url, NAME))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::episode;

    #[test]
    fn test_auth_headers() {
        let headers = auth_headers("key", "secret", 1_700_000_000);
        assert_eq!(headers[0], ("X-Auth-Key", "key".to_string()));
        assert_eq!(headers[1], ("X-Auth-Date", "1700000000".to_string()));

        let expected = hex::encode(Sha1::digest(b"keysecret1700000000"));
        assert_eq!(headers[2].1, expected);
        assert_eq!(headers[2].1.len(), 40);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_error() {
        let strategy = PodcastIndexStrategy::new(
            ResilientClient::with_defaults().unwrap(),
            PodcastIndexSettings {
                api_key: Some(String::new()),
                api_secret: Some(String::new()),
            },
        );
        let err = strategy
            .resolve(&episode(), &PodcastConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
