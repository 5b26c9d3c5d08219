//! Turning a candidate URL into a validated local audio file.

use crate::audio::{validate_audio_file, AudioFormat, SizeLimits, YtDlp};
use crate::config::{PodcastConfig, Settings};
use crate::episode::{is_youtube_url, Episode};
use crate::error::{HentError, Result, SourceError};
use crate::http::ResilientClient;
use crate::resilience::Guards;
use crate::strategy::{Candidate, Strategy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A validated audio file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub bytes: u64,
    pub format: AudioFormat,
}

impl FetchedAudio {
    /// Validate an existing file.
    pub fn inspect(path: &Path, limits: SizeLimits) -> std::result::Result<Self, SourceError> {
        let format = validate_audio_file(path, limits)?;
        let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            format,
        })
    }
}

/// Downloads one URL kind.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Whether this fetcher knows how to fetch `url`.
    fn handles(&self, url: &str) -> bool;

    /// Fetch `url` into `dest`. On failure `dest` does not exist.
    async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<FetchedAudio, SourceError>;
}

/// Out-of-band download through a real browser.
#[async_trait]
pub trait BrowserFetcher: Send + Sync {
    async fn fetch_via_browser(&self, url: &str, dest: &Path) -> std::result::Result<PathBuf, SourceError>;
}

/// Last-resort search by episode title and channel.
#[async_trait]
pub trait FallbackSearch: Send + Sync {
    async fn search(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>>;
}

/// Runs any strategy as the fallback search.
pub struct StrategyFallback(pub Arc<dyn Strategy>);

#[async_trait]
impl FallbackSearch for StrategyFallback {
    async fn search(&self, episode: &Episode, podcast: &PodcastConfig) -> Result<Vec<Candidate>> {
        self.0.resolve(episode, podcast).await
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    dest.with_extension("part")
}

/// Plain HTTP(S) downloads through the shared resilient client.
pub struct HttpAudioFetcher {
    client: ResilientClient,
    limits: SizeLimits,
}

impl HttpAudioFetcher {
    pub fn new(client: ResilientClient, limits: SizeLimits) -> Self {
        Self { client, limits }
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    fn handles(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    #[instrument(skip(self, dest))]
    async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<FetchedAudio, SourceError> {
        let part = partial_path(dest);
        let body = self.client.download_to(url, &part, self.limits.max_bytes).await?;
        debug!(bytes = body.bytes, final_url = %body.final_url, "Body downloaded");

        match FetchedAudio::inspect(&part, self.limits) {
            Ok(audio) => {
                std::fs::rename(&part, dest)
                    .map_err(|e| SourceError::PermanentSource(format!("cannot move audio into place: {}", e)))?;
                Ok(FetchedAudio {
                    path: dest.to_path_buf(),
                    ..audio
                })
            }
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                Err(e)
            }
        }
    }
}

/// Map a yt-dlp failure onto the source taxonomy.
fn ytdlp_error(err: HentError) -> SourceError {
    match err {
        HentError::ToolFailed(msg) if msg.contains("429") || msg.contains("Too Many Requests") => {
            SourceError::RateLimited {
                message: msg,
                retry_after: None,
            }
        }
        HentError::ToolNotFound(tool) => SourceError::PermanentSource(format!("{} is not installed", tool)),
        other => SourceError::PermanentSource(other.to_string()),
    }
}

/// YouTube downloads through yt-dlp, guarded like any other provider.
pub struct YtDlpFetcher {
    ytdlp: YtDlp,
    guards: Arc<Guards>,
    limits: SizeLimits,
}

impl YtDlpFetcher {
    pub fn new(ytdlp: YtDlp, guards: Arc<Guards>, limits: SizeLimits) -> Self {
        Self { ytdlp, guards, limits }
    }
}

#[async_trait]
impl AudioFetcher for YtDlpFetcher {
    fn handles(&self, url: &str) -> bool {
        is_youtube_url(url)
    }

    #[instrument(skip(self, dest))]
    async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<FetchedAudio, SourceError> {
        let guard = self.guards.get("youtube");
        guard
            .run(url, || async { self.ytdlp.download_audio(url, dest).await.map_err(ytdlp_error) })
            .await?;

        FetchedAudio::inspect(dest, self.limits).inspect_err(|_| {
            let _ = std::fs::remove_file(dest);
        })
    }
}

/// Operator-supplied local files (`/path`, `~/path`, `file://`).
pub struct LocalFileFetcher {
    limits: SizeLimits,
}

impl LocalFileFetcher {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    fn source_path(url: &str) -> PathBuf {
        let raw = url.strip_prefix("file://").unwrap_or(url);
        Settings::expand_path(raw)
    }
}

#[async_trait]
impl AudioFetcher for LocalFileFetcher {
    fn handles(&self, url: &str) -> bool {
        url.starts_with('/') || url.starts_with('~') || url.starts_with("file://")
    }

    async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<FetchedAudio, SourceError> {
        let source = Self::source_path(url);
        FetchedAudio::inspect(&source, self.limits)?;

        if source != dest {
            tokio::fs::copy(&source, dest)
                .await
                .map_err(|e| SourceError::PermanentSource(format!("cannot copy {}: {}", source.display(), e)))?;
        }
        FetchedAudio::inspect(dest, self.limits)
    }
}

/// The standard fetchers, most specific first.
pub fn standard_fetchers(
    settings: &Settings,
    client: ResilientClient,
    guards: Arc<Guards>,
) -> Vec<Arc<dyn AudioFetcher>> {
    let limits = SizeLimits {
        min_bytes: settings.download.min_audio_bytes,
        max_bytes: settings.download.max_audio_bytes,
    };
    vec![
        Arc::new(LocalFileFetcher::new(limits)),
        Arc::new(YtDlpFetcher::new(
            YtDlp::from_settings(&settings.youtube),
            guards,
            limits,
        )),
        Arc::new(HttpAudioFetcher::new(client, limits)),
    ]
}
