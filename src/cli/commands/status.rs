//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::download::{DownloadStatus, StateSnapshot};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Run the status command.
pub fn run_status(state: Option<PathBuf>, settings: Settings) -> Result<()> {
    let path = state.unwrap_or_else(|| settings.state_file());
    if !path.exists() {
        Output::info(&format!("No state file at {}", path.display()));
        return Ok(());
    }
    let snapshot = StateSnapshot::read(&path).context("Failed to read state file")?;

    Output::header(&format!("Download state ({} episodes)", snapshot.episodes.len()));
    for status in [
        DownloadStatus::Success,
        DownloadStatus::Failed,
        DownloadStatus::Retrying,
        DownloadStatus::Downloading,
        DownloadStatus::Pending,
    ] {
        let count = snapshot.episodes.values().filter(|r| r.status == status).count();
        if count > 0 {
            Output::kv(&status.to_string(), &count.to_string());
        }
    }

    for (key, record) in &snapshot.episodes {
        println!();
        Output::list_item(&format!("{} [{}]", key, record.status));
        if let Some(path) = &record.audio_path {
            Output::kv("audio", &path.display().to_string());
        }
        if let Some(err) = &record.last_error {
            Output::kv("last error", err);
        }
        for attempt in &record.attempts {
            Output::attempt(
                &attempt.strategy,
                &attempt.url,
                attempt.duration_seconds,
                if attempt.success { None } else { Some(attempt.error.as_deref().unwrap_or("failed")) },
            );
        }
    }

    Ok(())
}
