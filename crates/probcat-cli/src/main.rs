use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use probcat_ingest::IngestSummary;
use probcat_store::MemoryCatalog;

#[derive(Debug, Parser)]
#[command(name = "probcat")]
#[command(about = "Company-tagged interview problem catalog")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one batch ingestion and print the run tally.
    Ingest,
    /// Ingest, then serve the catalog query API.
    Serve,
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_tally(summary: &IngestSummary) {
    for outcome in &summary.outcomes {
        if outcome.is_missing() {
            println!("  {}: no source files (skipped)", outcome.company);
        } else {
            println!(
                "  {}: {} files, {} sightings, {} rows skipped",
                outcome.company, outcome.files_read, outcome.sightings, outcome.skipped_rows
            );
        }
    }
    println!(
        "ingest complete: run_id={} companies={} missing={} unique={} easy={} medium={} hard={} inserted={} rejected={}",
        summary.run_id,
        summary.companies_processed,
        summary.companies_missing,
        summary.unique_problems,
        summary.by_difficulty.easy,
        summary.by_difficulty.medium,
        summary.by_difficulty.hard,
        summary.inserted,
        summary.rejected
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let store = MemoryCatalog::new();
            let summary = probcat_ingest::run_ingest_from_env(&store).await?;
            print_tally(&summary);
        }
        Commands::Serve => {
            let store = Arc::new(MemoryCatalog::new());
            let summary = probcat_ingest::run_ingest_from_env(store.as_ref()).await?;
            print_tally(&summary);
            probcat_web::serve_from_env(store).await?;
        }
    }

    Ok(())
}
