//! Episode pipeline: cache, download, transcribe, summarize.
//!
//! Transcription, summarization and discovery are external collaborators
//! behind traits. The pipeline only decides when each is called.

use crate::cache::{CacheEntry, MatchTier, Mode, ModeSelector, TranscriptCache};
use crate::config::PodcastConfig;
use crate::download::DownloadOrchestrator;
use crate::episode::Episode;
use crate::error::Result;
use crate::http::ResilientClient;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Source label for transcripts produced by the transcriber.
pub const TRANSCRIBED: &str = "transcribed";
/// Source label for transcripts published alongside the episode.
pub const PUBLISHED: &str = "published";

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Summary pair produced for one transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub summary: String,
    pub paragraph: Option<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, episode: &Episode, transcript: &str) -> Result<Summary>;
}

/// Finds recent episodes of a podcast.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn fetch_candidate_episodes(
        &self,
        podcast: &str,
        config: &PodcastConfig,
        days_back: u32,
    ) -> Result<Vec<Episode>>;
}

/// Where a processed episode's transcript came from.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptOrigin {
    Cache { tier: MatchTier, degraded: bool },
    Published,
    Transcribed,
}

/// Result for one episode.
#[derive(Debug, Clone)]
pub struct ProcessedEpisode {
    pub episode: Episode,
    pub record_id: Option<i64>,
    pub origin: Option<TranscriptOrigin>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl ProcessedEpisode {
    fn failed(episode: Episode, error: impl Into<String>) -> Self {
        Self {
            episode,
            record_id: None,
            origin: None,
            summary: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct EpisodePipeline {
    cache: Arc<TranscriptCache>,
    downloader: Arc<DownloadOrchestrator>,
    transcriber: Arc<dyn Transcriber>,
    summarizer: Option<Arc<dyn Summarizer>>,
    transcript_client: Option<ResilientClient>,
    podcasts: BTreeMap<String, PodcastConfig>,
}

impl EpisodePipeline {
    pub fn new(
        cache: Arc<TranscriptCache>,
        downloader: Arc<DownloadOrchestrator>,
        transcriber: Arc<dyn Transcriber>,
        podcasts: BTreeMap<String, PodcastConfig>,
    ) -> Self {
        Self {
            cache,
            downloader,
            transcriber,
            summarizer: None,
            transcript_client: None,
            podcasts,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Fetch publisher transcripts (`transcript_url`) before downloading audio.
    pub fn with_transcript_client(mut self, client: ResilientClient) -> Self {
        self.transcript_client = Some(client);
        self
    }

    pub fn downloader(&self) -> &Arc<DownloadOrchestrator> {
        &self.downloader
    }

    /// Produce a cached transcript (and summary) for every episode.
    ///
    /// Cache hits are never downloaded or transcribed. Failures are reported
    /// per episode and do not stop the others.
    #[instrument(skip_all, fields(episodes = episodes.len(), mode = %mode))]
    pub async fn process(&self, episodes: Vec<Episode>, mode: Mode) -> Result<Vec<ProcessedEpisode>> {
        let mut results: Vec<Option<ProcessedEpisode>> = vec![None; episodes.len()];
        let mut misses = Vec::new();

        for (i, episode) in episodes.iter().enumerate() {
            match self.cache.read(&episode.identity(), ModeSelector::Strict(mode))?.hit() {
                Some(hit) => {
                    if hit.degraded {
                        warn!(title = %episode.title, "Using transcript from a title-only cache match");
                    }
                    let summary = match hit.summary.clone() {
                        Some(summary) => Some(summary),
                        None => self.summarize(episode, &hit.transcript, hit.record_id, mode).await,
                    };
                    results[i] = Some(ProcessedEpisode {
                        episode: episode.clone(),
                        record_id: Some(hit.record_id),
                        origin: Some(TranscriptOrigin::Cache {
                            tier: hit.tier,
                            degraded: hit.degraded,
                        }),
                        summary,
                        error: None,
                    });
                }
                None => {
                    if let Some(processed) = self.try_published(episode, mode).await? {
                        results[i] = Some(processed);
                    } else {
                        misses.push(i);
                    }
                }
            }
        }
        info!(
            cached = episodes.len() - misses.len(),
            to_download = misses.len(),
            "Cache checked"
        );

        if !misses.is_empty() {
            let batch: Vec<Episode> = misses.iter().map(|&i| episodes[i].clone()).collect();
            let downloaded = self.downloader.download_batch(batch, &self.podcasts, mode).await;

            for (&i, status) in misses.iter().zip(downloaded.episodes.iter()) {
                let episode = &episodes[i];
                let processed = match &status.audio_path {
                    Some(path) if status.is_success() => self.transcribe(episode, path, mode).await?,
                    _ => ProcessedEpisode::failed(
                        episode.clone(),
                        status
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "audio not downloaded".into()),
                    ),
                };
                results[i] = Some(processed);
            }
        }

        Ok(results
            .into_iter()
            .zip(episodes)
            .map(|(r, e)| r.unwrap_or_else(|| ProcessedEpisode::failed(e, "not processed")))
            .collect())
    }

    /// Use the publisher's transcript when the episode links one.
    async fn try_published(&self, episode: &Episode, mode: Mode) -> Result<Option<ProcessedEpisode>> {
        let (Some(client), Some(url)) = (&self.transcript_client, &episode.transcript_url) else {
            return Ok(None);
        };
        let text = match client.get_text(url).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(url = %url, error = %e, "Published transcript unavailable");
                return Ok(None);
            }
        };

        let entry = CacheEntry {
            transcript: &text,
            source: Some(PUBLISHED),
            ..Default::default()
        };
        let record_id = self.cache.write(episode, mode, &entry)?;
        let summary = self.summarize(episode, &text, record_id, mode).await;
        Ok(Some(ProcessedEpisode {
            episode: episode.clone(),
            record_id: Some(record_id),
            origin: Some(TranscriptOrigin::Published),
            summary,
            error: None,
        }))
    }

    /// Transcribe downloaded audio and store it. Cache errors propagate.
    async fn transcribe(&self, episode: &Episode, audio: &Path, mode: Mode) -> Result<ProcessedEpisode> {
        let text = match self.transcriber.transcribe(audio).await {
            Ok(text) => text,
            Err(e) => {
                warn!(title = %episode.title, error = %e, "Transcription failed");
                return Ok(ProcessedEpisode::failed(episode.clone(), e.to_string()));
            }
        };

        let entry = CacheEntry {
            transcript: &text,
            source: Some(TRANSCRIBED),
            ..Default::default()
        };
        let record_id = self.cache.write(episode, mode, &entry)?;
        let summary = self.summarize(episode, &text, record_id, mode).await;

        Ok(ProcessedEpisode {
            episode: episode.clone(),
            record_id: Some(record_id),
            origin: Some(TranscriptOrigin::Transcribed),
            summary,
            error: None,
        })
    }

    async fn summarize(&self, episode: &Episode, transcript: &str, record_id: i64, mode: Mode) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        match summarizer.summarize(episode, transcript).await {
            Ok(s) => {
                if let Err(e) = self
                    .cache
                    .update_summary(record_id, mode, &s.summary, s.paragraph.as_deref())
                {
                    warn!(record_id, error = %e, "Failed to store summary");
                }
                Some(s.summary)
            }
            Err(e) => {
                warn!(title = %episode.title, error = %e, "Summarization failed");
                None
            }
        }
    }
}
