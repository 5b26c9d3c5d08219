//! Configuration module for Hent.
//!
//! Handles loading settings, including the declarative per-podcast strategy table.

mod settings;

pub use settings::{
    CacheSettings, DownloadSettings, GeneralSettings, PodcastConfig, PodcastIndexSettings,
    ResilienceSettings, Settings, YoutubeSettings, DEFAULT_STRATEGY_CHAIN,
};
