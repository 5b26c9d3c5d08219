//! Lookup command implementation.

use crate::cache::{ModeSelector, TranscriptCache};
use crate::cli::Output;
use crate::config::Settings;
use crate::episode::Episode;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};

/// Run the lookup command.
pub fn run_lookup(
    podcast: &str,
    title: &str,
    guid: Option<String>,
    date: Option<&str>,
    mode: &str,
    settings: Settings,
) -> Result<()> {
    let selector: ModeSelector = mode.parse()?;
    let published = match date {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", d))?
            .and_hms_opt(12, 0, 0)
            .context("Invalid time")?
            .and_utc(),
        None => Utc::now(),
    };

    let mut episode = Episode::new(podcast, title, published);
    episode.guid = guid;

    let cache = TranscriptCache::new(&settings.sqlite_path())
        .context("Failed to open transcript cache")?
        .with_title_only_match(settings.cache.title_only_match);

    match cache.read(&episode.identity(), selector)?.hit() {
        Some(hit) => {
            Output::header(&format!("{} - {}", podcast, title));
            Output::kv("Record", &hit.record_id.to_string());
            Output::kv("Mode", hit.mode.as_str());
            Output::kv("Matched by", &hit.tier.to_string());
            if hit.degraded {
                Output::warning("Matched by title only; this may be a different airing.");
            }
            if let Some(source) = &hit.source {
                Output::kv("Source", source);
            }
            Output::kv("Length", &format!("{} chars", hit.transcript.chars().count()));
            if let Some(summary) = &hit.summary {
                Output::header("Summary");
                println!("{}", summary);
            }
            Output::header("Transcript");
            let preview: String = hit.transcript.chars().take(1000).collect();
            println!("{}", preview);
        }
        None => {
            Output::warning(&format!("No cached transcript for '{}' ({})", title, mode));
        }
    }

    Ok(())
}
