//! HTTP client with per-provider resilience.
//!
//! Every request goes through the guard of the host it targets: retry
//! wraps rate limiting, which wraps the circuit breaker, which wraps the call.

use crate::config::Settings;
use crate::error::{parse_retry_after, Result, SourceError};
use crate::resilience::Guards;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// A body streamed to disk.
#[derive(Debug, Clone)]
pub struct DownloadedBody {
    pub path: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
    /// URL after redirects.
    pub final_url: String,
}

/// Shared HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    guards: Arc<Guards>,
    request_timeout: Duration,
}

impl ResilientClient {
    /// Build a client from settings, sharing the given guard registry.
    pub fn new(settings: &Settings, guards: Arc<Guards>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.download.user_agent.clone())
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            guards,
            request_timeout: Duration::from_secs(settings.download.request_timeout_seconds),
        })
    }

    /// Client with default settings and a private guard registry.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&Settings::default(), Arc::new(Guards::default()))
    }

    pub fn guards(&self) -> &Arc<Guards> {
        &self.guards
    }

    async fn send(
        &self,
        url: &str,
        headers: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> std::result::Result<reqwest::Response, SourceError> {
        let mut request = self.http.get(url);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(SourceError::from_status(status.as_u16(), url, retry_after))
    }

    /// GET a text body.
    #[instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> std::result::Result<String, SourceError> {
        let guard = self.guards.for_url(url);
        guard
            .run(url, || async {
                let response = self.send(url, &[], Some(self.request_timeout)).await?;
                response.text().await.map_err(SourceError::from)
            })
            .await
    }

    /// GET and decode a JSON body, with extra request headers.
    #[instrument(skip(self, headers))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> std::result::Result<T, SourceError> {
        let guard = self.guards.for_url(url);
        let body = guard
            .run(url, || async {
                let response = self.send(url, headers, Some(self.request_timeout)).await?;
                response.text().await.map_err(SourceError::from)
            })
            .await?;

        serde_json::from_str(&body)
            .map_err(|e| SourceError::Validation(format!("invalid JSON from {}: {}", url, e)))
    }

    /// Stream a body to `dest`, refusing HTML and bodies above `max_bytes`.
    ///
    /// A partial file is removed on failure.
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> std::result::Result<DownloadedBody, SourceError> {
        let guard = self.guards.for_url(url);
        let result = guard
            .run(url, || async { self.stream_once(url, dest, max_bytes).await })
            .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn stream_once(
        &self,
        url: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> std::result::Result<DownloadedBody, SourceError> {
        let response = self.send(url, &[], None).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(ct) = &content_type {
            if ct.contains("text/html") {
                return Err(SourceError::Validation(format!(
                    "{} returned an HTML page instead of audio",
                    url
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(SourceError::Validation(format!(
                    "{} is {} bytes, above the {} byte limit",
                    url, len, max_bytes
                )));
            }
        }

        let final_url = response.url().to_string();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SourceError::PermanentSource(format!("cannot create {}: {}", dest.display(), e)))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(SourceError::Validation(format!(
                    "{} exceeded the {} byte limit while streaming",
                    url, max_bytes
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| SourceError::PermanentSource(format!("write failed: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| SourceError::PermanentSource(format!("write failed: {}", e)))?;

        debug!(bytes = written, "Download complete");

        Ok(DownloadedBody {
            path: dest.to_path_buf(),
            bytes: written,
            content_type,
            final_url,
        })
    }
}
