//! Fetch command implementation.

use super::Engine;
use crate::cache::{Mode, ModeSelector, TranscriptCache};
use crate::cli::Output;
use crate::config::Settings;
use crate::download::{DownloadStatus, EpisodeDownloadStatus, ProgressCallback};
use crate::error::HentError;
use crate::pipeline::Discovery;
use crate::strategy::FeedDiscovery;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for `hent fetch`.
#[derive(Debug)]
pub struct FetchOptions {
    pub podcasts: Vec<String>,
    pub days: Option<u32>,
    pub mode: String,
    pub state: Option<PathBuf>,
    pub resume: bool,
    pub concurrency: Option<usize>,
    pub manual: Vec<String>,
}

/// Run the fetch command.
pub async fn run_fetch(options: FetchOptions, mut settings: Settings) -> Result<()> {
    let mode: Mode = options.mode.parse()?;
    if let Some(concurrency) = options.concurrency {
        settings.download.concurrency = concurrency;
        settings.validate()?;
    }
    let days = options.days.unwrap_or(settings.general.days_back);

    let names: Vec<String> = if options.podcasts.is_empty() {
        settings.podcasts.keys().cloned().collect()
    } else {
        options.podcasts.clone()
    };
    if names.is_empty() {
        Output::warning("No podcasts configured. Add [podcasts.\"Name\"] tables to the config file.");
        return Ok(());
    }

    let engine = Engine::build(&settings)?;

    // Discover
    let discovery = FeedDiscovery::new(engine.client.clone());
    let spinner = Output::spinner("Discovering episodes...");
    let mut episodes = Vec::new();
    for name in &names {
        let config = settings.podcast(name);
        match discovery.fetch_candidate_episodes(name, &config, days).await {
            Ok(found) => episodes.extend(found),
            Err(e) => Output::warning(&format!("{}: discovery failed: {}", name, e)),
        }
    }
    spinner.finish_and_clear();
    Output::info(&format!(
        "Found {} episodes from the last {} days across {} podcasts",
        episodes.len(),
        days,
        names.len()
    ));

    // Skip episodes whose transcript is already cached in this mode
    let cache = TranscriptCache::new(&settings.sqlite_path())
        .context("Failed to open transcript cache")?
        .with_title_only_match(settings.cache.title_only_match);
    let mut to_fetch = Vec::new();
    let mut cached = 0;
    for episode in episodes {
        if cache.read(&episode.identity(), ModeSelector::Strict(mode))?.is_hit() {
            cached += 1;
        } else {
            to_fetch.push(episode);
        }
    }
    if cached > 0 {
        Output::info(&format!("{} episodes already have {} transcripts cached", cached, mode));
    }
    if to_fetch.is_empty() {
        Output::success("Nothing to download.");
        return Ok(());
    }

    let state_path = options.state.clone().unwrap_or_else(|| settings.state_file());
    let pb = Output::progress_bar(to_fetch.len() as u64, "downloading");
    let finished = Arc::new(Mutex::new(HashSet::new()));
    let progress: ProgressCallback = {
        let pb = pb.clone();
        Arc::new(move |status: &EpisodeDownloadStatus| {
            if matches!(status.status, DownloadStatus::Success | DownloadStatus::Failed)
                && finished.lock().insert(status.key())
            {
                pb.inc(1);
            }
            pb.set_message(status.episode.title.clone());
        })
    };
    let orchestrator = engine.orchestrator(&settings, Some(progress), &state_path);

    if options.resume && state_path.exists() {
        let restored = orchestrator.load_state(&state_path, &to_fetch)?;
        Output::info(&format!("Resumed {} episodes from {}", restored, state_path.display()));
    }
    for entry in &options.manual {
        match entry.split_once('=') {
            Some((key, url)) => orchestrator.add_manual_url(key, url),
            None => Output::warning(&format!("Ignoring --manual '{}': expected KEY=URL", entry)),
        }
    }

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        });
    }

    let result = orchestrator.download_batch(to_fetch, &settings.podcasts, mode).await;
    pb.finish_and_clear();
    orchestrator.save_state(&state_path)?;

    Output::header("Downloads");
    for status in &result.episodes {
        Output::episode_status(status);
    }
    for failure in &result.config_failures {
        Output::error(&format!("{}: {}", failure.podcast, failure.error));
    }

    println!();
    Output::kv("Downloaded", &result.success_count().to_string());
    Output::kv("Failed", &result.failure_count().to_string());
    Output::kv("State file", &state_path.display().to_string());

    if result.cancelled {
        Output::warning("Re-run with --resume to continue.");
        return Err(HentError::Cancelled.into());
    } else if result.failure_count() > 0 {
        Output::info("Use 'hent status' to see every attempt, then --manual KEY=URL to supply a source.");
    } else {
        Output::success("All episodes downloaded.");
    }
    Ok(())
}
