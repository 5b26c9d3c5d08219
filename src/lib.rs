//! Hent - resilient podcast audio retrieval
//!
//! Acquires one playable audio file (and, when it exists, one transcript)
//! per podcast episode from sources that are slow, flaky or hostile:
//! RSS feeds, Apple Podcasts, Podcast Index, episode pages and YouTube.
//!
//! The name "Hent" is Norwegian for "fetch."
//!
//! # Architecture
//!
//! - `resilience` - Rate limiter, circuit breaker and retry with backoff
//! - `http` - HTTP client routing every request through a provider guard
//! - `strategy` - Named source resolvers run as an ordered chain
//! - `audio` - Audio validation and yt-dlp extraction
//! - `download` - Concurrent batch downloads with attempt ledgers and resumable state
//! - `cache` - Transcript cache isolated per processing mode
//! - `pipeline` - Cache, download, transcribe and summarize in order
//!
//! # Example
//!
//! ```rust,no_run
//! use hent::cache::Mode;
//! use hent::config::Settings;
//! use hent::download::{standard_fetchers, DownloadOrchestrator};
//! use hent::http::ResilientClient;
//! use hent::resilience::Guards;
//! use hent::strategy::{StrategyChain, StrategyRegistry, SuccessHistory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let guards = Arc::new(Guards::new(settings.resilience.clone()));
//!     let client = ResilientClient::new(&settings, guards.clone())?;
//!     let chain = StrategyChain::new(
//!         Arc::new(StrategyRegistry::standard(client.clone(), &settings)),
//!         Arc::new(SuccessHistory::load(&settings.history_path())),
//!     );
//!     let orchestrator = Arc::new(DownloadOrchestrator::new(
//!         chain,
//!         standard_fetchers(&settings, client, guards),
//!         &settings,
//!     ));
//!
//!     let result = orchestrator
//!         .download_batch(Vec::new(), &settings.podcasts, Mode::Full)
//!         .await;
//!     println!("Downloaded {} episodes", result.success_count());
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod episode;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod resilience;
pub mod strategy;

pub use error::{HentError, Result};
