//! The episode's own enclosure URL.

use super::{Candidate, Strategy};
use crate::config::PodcastConfig;
use crate::episode::Episode;
use crate::error::Result;
use async_trait::async_trait;

pub(crate) const NAME: &str = "direct";

/// Returns the audio URL discovery already found.
pub struct DirectStrategy;

#[async_trait]
impl Strategy for DirectStrategy {
    fn name(&self) -> &str {
        NAME
    }

    async fn resolve(&self, episode: &Episode, _podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        Ok(episode
            .audio_url
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| Candidate::new(u.clone(), NAME))
            .collect())
    }
}
