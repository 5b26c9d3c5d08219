//! Hent CLI entry point.

use anyhow::Result;
use clap::Parser;
use hent::cli::commands::{self, FetchOptions};
use hent::cli::{Cli, Commands};
use hent::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("hent={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    std::fs::create_dir_all(settings.data_dir())?;

    match cli.command {
        Commands::Fetch {
            podcasts,
            days,
            mode,
            state,
            resume,
            concurrency,
            manual,
        } => {
            let options = FetchOptions {
                podcasts,
                days,
                mode,
                state,
                resume,
                concurrency,
                manual,
            };
            commands::run_fetch(options, settings).await?;
        }

        Commands::Lookup {
            podcast,
            title,
            guid,
            date,
            mode,
        } => {
            commands::run_lookup(&podcast, &title, guid, date.as_deref(), &mode, settings)?;
        }

        Commands::Status { state } => {
            commands::run_status(state, settings)?;
        }

        Commands::Strategies => {
            commands::run_strategies(settings)?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings)?;
        }
    }

    Ok(())
}
