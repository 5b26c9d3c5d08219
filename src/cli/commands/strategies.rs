//! Strategies command implementation.

use super::Engine;
use crate::cli::Output;
use crate::config::Settings;
use crate::episode::Episode;
use anyhow::Result;
use chrono::Utc;

/// Run the strategies command.
pub fn run_strategies(settings: Settings) -> Result<()> {
    let engine = Engine::build(&settings)?;
    let registry = engine.chain.registry();

    Output::header("Available strategies");
    for name in registry.names() {
        Output::list_item(&name);
    }

    if settings.podcasts.is_empty() {
        Output::info("No podcasts configured.");
        return Ok(());
    }

    Output::header("Podcast chains");
    for (name, config) in &settings.podcasts {
        let sample = Episode::new(name.as_str(), "", Utc::now());
        let mut order = config.priority_strategies.clone();
        for strategy in engine.chain.order_for(&sample, config) {
            if !order.contains(&strategy) {
                order.push(strategy);
            }
        }

        let unknown: Vec<&String> = order.iter().filter(|s| !registry.contains(s)).collect();
        Output::list_item(&format!("{}: {}", name, order.join(" -> ")));
        if !unknown.is_empty() {
            Output::warning(&format!(
                "{}: unknown strategies {:?}; its episodes will fail",
                name, unknown
            ));
        }
    }

    Ok(())
}
