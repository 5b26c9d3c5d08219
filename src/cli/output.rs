//! CLI output formatting utilities.

use crate::download::{DownloadStatus, EpisodeDownloadStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one episode's download outcome.
    pub fn episode_status(status: &EpisodeDownloadStatus) {
        let label = style(status.status.to_string());
        let marker = match status.status {
            DownloadStatus::Success => label.green(),
            DownloadStatus::Failed => label.red(),
            _ => label.yellow(),
        };
        println!(
            "  {} {} ({}, {} attempts)",
            marker,
            style(&status.episode.title).bold(),
            style(&status.episode.podcast).dim(),
            status.ledger.len()
        );
        if let Some(source) = &status.download_source {
            println!("     via {}", style(source).cyan());
        }
        if let Some(err) = &status.last_error {
            if !status.is_success() {
                println!("     {}", style(err).dim());
            }
        }
    }

    /// Print an attempt line.
    pub fn attempt(strategy: &str, url: &str, seconds: f64, error: Option<&str>) {
        let outcome = match error {
            None => style("ok".to_string()).green(),
            Some(e) => style(content_preview(e, 80)).red(),
        };
        println!(
            "     {} {} {} {}",
            style(format!("[{}]", strategy)).cyan(),
            content_preview(url, 80),
            style(format_duration(seconds)).dim(),
            outcome
        );
    }

    /// Create a progress bar.
    pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format duration in seconds to a human-readable string.
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", seconds)
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_len: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_len {
        content
    } else {
        let cut: String = content.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3725.0), "1h 2m 5s");
        assert_eq!(format_duration(65.0), "1m 5s");
        assert_eq!(format_duration(2.5), "2.5s");
    }

    #[test]
    fn test_content_preview_is_char_safe() {
        assert_eq!(content_preview("short", 10), "short");
        assert_eq!(content_preview("ååååå", 2), "åå...");
    }
}
