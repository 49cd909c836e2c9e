//! Hedge Replay - replays a scripted client session through hedge-engine.
//!
//! The script interleaves local writes, server updates and round-trip
//! boundaries. The cache can be seeded from a saved snapshot first. Every
//! change event is logged, and the final live cache is printed as a
//! snapshot on stdout.

mod config;
mod driver;
mod error;
mod script;

use crate::config::Config;
use crate::script::Script;
use hedge_engine::StoreSnapshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hedge_replay=info,hedge_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let source = std::fs::read_to_string(&config.script).map_err(error::AppError::from)?;
    let script = Script::from_json(&source).map_err(error::AppError::from)?;
    tracing::info!(
        "Replaying {} steps from {}",
        script.steps.len(),
        config.script.display()
    );

    let initial = match &config.initial {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(error::AppError::from)?;
            tracing::info!("Seeding cache from {}", path.display());
            Some(StoreSnapshot::from_json(&source)?)
        }
        None => None,
    };

    let outcome = driver::run(script, initial, &config).await?;
    tracing::info!(
        reverts = outcome.reports.len(),
        events = outcome.events,
        documents = outcome.snapshot.document_count(),
        "replay finished"
    );

    let json = outcome
        .snapshot
        .to_json_pretty()
        .map_err(error::AppError::from)?;
    println!("{json}");

    Ok(())
}
