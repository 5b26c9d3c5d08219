//! YouTube search via yt-dlp.

use super::{Candidate, Strategy};
use crate::audio::{extract_video_id, YtDlp};
use crate::config::{PodcastConfig, YoutubeSettings};
use crate::episode::{is_youtube_url, Episode};
use crate::error::Result;
use async_trait::async_trait;
use tracing::instrument;

pub(crate) const NAME: &str = "youtube_search";

/// Returns the episode's YouTube URL if it has one, else searches YouTube
/// for the title (narrowed by the configured channel).
pub struct YoutubeSearchStrategy {
    ytdlp: YtDlp,
    results: u32,
}

impl YoutubeSearchStrategy {
    pub fn new(settings: YoutubeSettings) -> Self {
        Self {
            ytdlp: YtDlp::from_settings(&settings),
            results: settings.search_results,
        }
    }
}

/// Search query for an episode.
pub(crate) fn search_query(episode: &Episode, podcast: &PodcastConfig) -> String {
    let show = podcast.youtube_channel.as_deref().unwrap_or(&episode.podcast);
    format!("{} {}", show, episode.title)
}

#[async_trait]
impl Strategy for YoutubeSearchStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        if let Some(url) = episode.audio_url.as_deref().filter(|u| is_youtube_url(u)) {
            let url = extract_video_id(url)
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                .unwrap_or_else(|| url.to_string());
            return Ok(vec![Candidate::new(url, NAME)]);
        }

        let urls = self.ytdlp.search(&search_query(episode, podcast), self.results).await?;
        Ok(urls.into_iter().map(|u| Candidate::new(u, NAME)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::episode;

    #[tokio::test]
    async fn test_known_youtube_url_needs_no_search() {
        let strategy = YoutubeSearchStrategy::new(YoutubeSettings {
            ytdlp_path: "hent-no-such-binary".into(),
            ..Default::default()
        });
        let ep = episode().with_audio_url("https://youtu.be/dQw4w9WgXcQ");
        let found = strategy.resolve(&ep, &PodcastConfig::default()).await.unwrap();
        assert_eq!(found[0].url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_query_uses_channel() {
        let podcast = PodcastConfig {
            youtube_channel: Some("David Senra".into()),
            ..Default::default()
        };
        assert_eq!(search_query(&episode(), &podcast), "David Senra #380 Steve Jobs");
    }
}
