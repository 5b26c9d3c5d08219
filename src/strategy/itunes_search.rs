//! iTunes free-text episode search.

use super::{same_episode, AppleLookup, Candidate, Strategy};
use crate::config::PodcastConfig;
use crate::episode::Episode;
use crate::error::Result;
use crate::http::ResilientClient;
use async_trait::async_trait;
use tracing::instrument;

pub(crate) const NAME: &str = "itunes_search";

const SEARCH_LIMIT: u32 = 25;

/// Searches the iTunes catalogue for `"<podcast> <title>"`.
///
/// Useful when the podcast has no configured Apple id and the lookup
/// strategy cannot find its collection.
pub struct ItunesSearchStrategy {
    lookup: AppleLookup,
}

impl ItunesSearchStrategy {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            lookup: AppleLookup::new(client),
        }
    }
}

#[async_trait]
impl Strategy for ItunesSearchStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, _podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        let term = format!("{} {}", episode.podcast, episode.title);
        let items = self.lookup.search_episodes(&term, SEARCH_LIMIT).await?;
        let show = episode.podcast.to_lowercase();

        Ok(items
            .iter()
            .filter(|i| {
                i.collection_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(&show))
            })
            .filter(|i| same_episode(episode, i.track_name.as_deref().unwrap_or_default(), i.released()))
            .filter_map(|i| i.episode_url.clone())
            .map(|url| Candidate::new(url, NAME))
            .collect())
    }
}
