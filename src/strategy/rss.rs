//! RSS/Atom feed strategy.

use super::{same_episode, Candidate, Strategy};
use crate::config::PodcastConfig;
use crate::episode::Episode;
use crate::error::{Result, SourceError};
use crate::http::ResilientClient;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

pub(crate) const NAME: &str = "rss";

/// Parse a feed body into episodes of `podcast`.
///
/// Entries without a title or publication date are skipped. The audio URL
/// comes from the first media enclosure, else from an `audio/*` link.
pub fn parse_feed(podcast: &str, body: &[u8]) -> std::result::Result<Vec<Episode>, SourceError> {
    let feed = feed_rs::parser::parse(body)
        .map_err(|e| SourceError::Validation(format!("unparseable feed: {}", e)))?;

    let mut episodes = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let Some(title) = entry.title.map(|t| t.content) else {
            continue;
        };
        let Some(published) = entry.published.or(entry.updated) else {
            continue;
        };

        let content = entry.media.first().and_then(|m| m.content.first());
        let audio_url = content
            .and_then(|c| c.url.as_ref())
            .map(|u| u.to_string())
            .or_else(|| {
                entry
                    .links
                    .iter()
                    .find(|l| l.media_type.as_deref().is_some_and(|t| t.starts_with("audio/")))
                    .map(|l| l.href.clone())
            });
        let duration = content
            .and_then(|c| c.duration)
            .map(|d| {
                let secs = d.as_secs();
                format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
            });
        let link = entry
            .links
            .iter()
            .find(|l| l.media_type.is_none() || l.media_type.as_deref() == Some("text/html"))
            .map(|l| l.href.clone());

        let mut episode = Episode::new(podcast, title.trim(), published);
        episode.audio_url = audio_url;
        episode.description = entry.summary.map(|s| s.content);
        episode.link = link;
        episode.duration = duration;
        if !entry.id.trim().is_empty() {
            episode.guid = Some(entry.id);
        }
        episodes.push(episode);
    }

    Ok(episodes)
}

/// Finds the episode in the podcast's configured feeds.
#[derive(Clone)]
pub struct RssStrategy {
    client: ResilientClient,
}

impl RssStrategy {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    /// Fetch and parse one feed.
    pub async fn fetch_feed(&self, podcast: &str, url: &str) -> std::result::Result<Vec<Episode>, SourceError> {
        let body = self.client.get_text(url).await?;
        parse_feed(podcast, body.as_bytes())
    }
}

#[async_trait]
impl Strategy for RssStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        let wanted = episode.identity();
        let mut candidates = Vec::new();
        let mut last_error = None;

        for feed_url in &podcast.rss_feeds {
            let entries = match self.fetch_feed(&episode.podcast, feed_url).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(feed = %feed_url, error = %e, "Feed fetch failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let found = entries.iter().find(|e| {
                (wanted.guid.is_some() && e.identity().matches(&wanted))
                    || same_episode(episode, &e.title, Some(e.published))
            });

            if let Some(url) = found.and_then(|e| e.audio_url.clone()) {
                debug!(feed = %feed_url, url = %url, "Matched episode in feed");
                if !candidates.iter().any(|c: &Candidate| c.url == url) {
                    candidates.push(Candidate::new(url, NAME));
                }
            }
        }

        // A feed failure with no match elsewhere fails the strategy.
        match (candidates.is_empty(), last_error) {
            (true, Some(e)) => Err(e.into()),
            _ => Ok(candidates),
        }
    }
}
