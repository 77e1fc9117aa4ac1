use std::sync::Arc;

use anyhow::{Context, Result};
use cardcache_engine::{Config, SyncEngine, SyncOptions};
use cardcache_ingest::{BulkFetcher, HttpClientConfig};
use cardcache_store::PgCardStore;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cardcache")]
#[command(about = "Card catalog cache daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync daemon on its fixed interval, forever.
    Run,
    /// Run a single sync cycle (with retries) and exit.
    Once,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Configuration and connectivity failures are fatal; once the daemon
    // is running, cycle failures are logged and retried instead.
    let config = Config::from_env().context("loading configuration")?;
    let store = PgCardStore::connect(&config.database_url(), config.write_type_index)
        .await
        .context("connecting to the card store")?;
    info!(host = %config.db_host, db = %config.db_name, "store connection established");

    let fetcher = BulkFetcher::new(config.source_url.clone(), HttpClientConfig::default())
        .context("building bulk fetcher")?;
    let engine = SyncEngine::new(
        Arc::new(fetcher),
        Arc::new(store),
        SyncOptions::from_config(&config),
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(source = %config.source_url, "starting card cache daemon");
            engine.run_forever().await;
        }
        Commands::Once => {
            let report = engine.run_cycle_with_retries().await?;
            println!(
                "cycle complete: run_id={} attempts={} cards={} inserted={} updated={} unchanged={}",
                report.run_id,
                report.attempts,
                report.canonical_cards,
                report.inserted,
                report.updated,
                report.unchanged
            );
        }
    }

    Ok(())
}
