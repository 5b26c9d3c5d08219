//! CLI module for Hent.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hent - resilient podcast audio retrieval
///
/// Finds, downloads and caches podcast episodes from feeds, directories,
/// web pages and YouTube, falling back from source to source.
#[derive(Parser, Debug)]
#[command(name = "hent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover recent episodes and download their audio
    Fetch {
        /// Podcast to fetch (repeatable; default: every configured podcast)
        #[arg(short, long = "podcast")]
        podcasts: Vec<String>,

        /// How many days back to look for episodes
        #[arg(short, long)]
        days: Option<u32>,

        /// Processing mode (test or full)
        #[arg(short, long, default_value = "full")]
        mode: String,

        /// State file for resumable batches
        #[arg(long)]
        state: Option<PathBuf>,

        /// Restore progress from the state file before starting
        #[arg(long)]
        resume: bool,

        /// Maximum concurrent episode downloads
        #[arg(long)]
        concurrency: Option<usize>,

        /// Manual audio URL for an episode, as KEY=URL (KEY is podcast|title|published)
        #[arg(long = "manual")]
        manual: Vec<String>,
    },

    /// Look up a cached transcript
    Lookup {
        /// Podcast name
        podcast: String,

        /// Episode title
        title: String,

        /// Episode GUID
        #[arg(long)]
        guid: Option<String>,

        /// Publication date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// Mode to read (test, full, or any)
        #[arg(short, long, default_value = "full")]
        mode: String,
    },

    /// Show the contents of a download state file
    Status {
        /// State file (default: the configured one)
        state: Option<PathBuf>,
    },

    /// List strategies and each podcast's resolved chain
    Strategies,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
