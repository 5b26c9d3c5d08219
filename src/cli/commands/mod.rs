//! CLI command implementations.

mod config;
mod fetch;
mod lookup;
mod status;
mod strategies;

pub use config::run_config;
pub use fetch::{run_fetch, FetchOptions};
pub use lookup::run_lookup;
pub use status::run_status;
pub use strategies::run_strategies;

use crate::config::Settings;
use crate::download::{standard_fetchers, DownloadOrchestrator, ProgressCallback, StrategyFallback};
use crate::http::ResilientClient;
use crate::resilience::Guards;
use crate::strategy::{StrategyChain, StrategyRegistry, SuccessHistory};
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs to resolve and download, wired from settings.
pub(crate) struct Engine {
    pub client: ResilientClient,
    pub chain: StrategyChain,
}

impl Engine {
    pub fn build(settings: &Settings) -> anyhow::Result<Self> {
        let guards = Arc::new(Guards::new(settings.resilience.clone()));
        let client = ResilientClient::new(settings, guards)?;
        let registry = Arc::new(StrategyRegistry::standard(client.clone(), settings));
        let history = Arc::new(SuccessHistory::load(&settings.history_path()));
        Ok(Self {
            chain: StrategyChain::new(registry, history),
            client,
        })
    }

    pub fn orchestrator(
        &self,
        settings: &Settings,
        progress: Option<ProgressCallback>,
        state_file: &Path,
    ) -> Arc<DownloadOrchestrator> {
        let fetchers = standard_fetchers(settings, self.client.clone(), Arc::clone(self.client.guards()));
        let mut orchestrator =
            DownloadOrchestrator::new(self.chain.clone(), fetchers, settings).with_state_file(state_file);

        if settings.download.fallback_search {
            if let Ok(search) = self.chain.registry().get("youtube_search") {
                orchestrator = orchestrator.with_fallback(Arc::new(StrategyFallback(search)));
            }
        }
        if let Some(callback) = progress {
            orchestrator = orchestrator.with_progress(callback);
        }
        Arc::new(orchestrator)
    }
}
