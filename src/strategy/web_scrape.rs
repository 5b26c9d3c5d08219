//! Page scraping for audio links.

use super::{Candidate, Strategy};
use crate::config::PodcastConfig;
use crate::episode::{extract_episode_number, normalize_title, Episode};
use crate::error::Result;
use crate::http::ResilientClient;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};

pub(crate) const NAME: &str = "web_scrape";

fn audio_link_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+?\.(?:mp3|m4a)(?:\?[^\s"'<>]*)?"#).ok())
        .as_ref()
}

/// Audio URLs found in an HTML page, in page order, de-duplicated.
pub(crate) fn extract_audio_links(html: &str) -> Vec<String> {
    let Some(re) = audio_link_regex() else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();
    for m in re.find_iter(html) {
        let url = m.as_str().replace("&amp;", "&");
        if !links.contains(&url) {
            links.push(url);
        }
    }
    links
}

/// Whether a link on the show's home page looks like it belongs to `episode`.
fn link_mentions_episode(url: &str, episode: &Episode) -> bool {
    let lower = url.to_lowercase();
    let number = extract_episode_number(&episode.title);
    if number != "ep000" && lower.contains(number.trim_start_matches("ep")) {
        return true;
    }
    let slug = normalize_title(&episode.title).replace(' ', "-");
    !slug.is_empty() && lower.contains(&slug)
}

/// Scrapes the episode page, then the podcast website.
pub struct WebScrapeStrategy {
    client: ResilientClient,
}

impl WebScrapeStrategy {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for WebScrapeStrategy {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(podcast = %episode.podcast))]
    async fn resolve(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        let mut urls: Vec<String> = Vec::new();

        if let Some(page) = &episode.link {
            match self.client.get_text(page).await {
                Ok(html) => urls.extend(extract_audio_links(&html)),
                Err(e) => warn!(page = %page, error = %e, "Episode page fetch failed"),
            }
        }

        if urls.is_empty() {
            if let Some(site) = &podcast.website {
                let html = self.client.get_text(site).await?;
                urls.extend(
                    extract_audio_links(&html)
                        .into_iter()
                        .filter(|u| link_mentions_episode(u, episode)),
                );
            }
        }

        debug!(count = urls.len(), "Scraped audio links");
        Ok(urls.into_iter().map(|u| Candidate::new(u, NAME)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::episode;

    #[test]
    fn test_extract_audio_links() {
        let html = r#"
            <a href="https://media.example.com/ep380.mp3?x=1&amp;y=2">Download</a>
            <audio src="https://media.example.com/ep380.mp3?x=1&amp;y=2"></audio>
            <source src='https://cdn.example.com/file.m4a'>
            <img src="https://cdn.example.com/cover.jpg">
        "#;
        assert_eq!(
            extract_audio_links(html),
            vec![
                "https://media.example.com/ep380.mp3?x=1&y=2".to_string(),
                "https://cdn.example.com/file.m4a".to_string(),
            ]
        );
    }

    #[test]
    fn test_home_page_links_filtered_by_episode() {
        let ep = episode();
        assert!(link_mentions_episode("https://cdn.example.com/founders-380.mp3", &ep));
        assert!(!link_mentions_episode("https://cdn.example.com/founders-212.mp3", &ep));
    }
}
