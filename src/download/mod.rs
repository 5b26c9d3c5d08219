//! Download orchestration.
//!
//! [`DownloadOrchestrator`] walks each episode's sources in a fixed order
//! (manual override, browser request, priority strategies, the strategy
//! chain, the discovered URL, the fallback search) and records every URL it
//! tries in the episode's [`AttemptLedger`].

mod attempt;
mod fetch;
mod orchestrator;
mod status;

pub use attempt::{Attempt, AttemptLedger};
pub use fetch::{
    standard_fetchers, AudioFetcher, BrowserFetcher, FallbackSearch, FetchedAudio, HttpAudioFetcher,
    LocalFileFetcher, StrategyFallback, YtDlpFetcher,
};
pub use orchestrator::{DownloadOrchestrator, ProgressCallback, BROWSER, CACHED_FILE, MANUAL, ORIGINAL_URL};
pub use status::{
    AttemptRecord, BatchResult, ConfigFailure, DownloadStatus, EpisodeDownloadStatus, EpisodeRecord,
    StateSnapshot, StatusReport,
};
