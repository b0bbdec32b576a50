use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use recordlink_common::{Config, EntityKind};
use recordlink_graph::{
    cdc, migrate, ChangeFeedWatcher, GraphClient, IncrementalResolver, RecordWriter,
    ResolutionPipeline,
};

mod rows;

const OWNERS_CSV: &str = "Business_Owners.csv";
const CONTRACTS_CSV: &str = "Contracts.csv";
const OWNERS_BATCH_CSV: &str = "Owners_batch.csv";

#[derive(Parser)]
#[command(name = "recordlink", about = "Record linkage pipeline over a graph store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import person records from <SOURCE>/Business_Owners.csv
    ImportPeople { source: PathBuf },
    /// Import organizations and addresses from <SOURCE>/Contracts.csv
    ImportOrgs { source: PathBuf },
    /// Run full person resolution
    ResolvePeople,
    /// Run full organization resolution
    ResolveOrgs,
    /// Poll the change feed and log events
    Watch,
    /// Run the incremental batch simulation from <SOURCE>/Owners_batch.csv
    SimulateBatch { source: PathBuf },
    /// Roll back a simulated batch
    CleanBatch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let client = GraphClient::connect(&config).await?;

    match cli.command {
        Command::ImportPeople { source } => {
            let file = csv_file(&source, OWNERS_CSV)?;
            info!("Setting constraints...");
            migrate::migrate(&client).await?;
            info!("Importing people records...");
            let records = rows::person_rows(&file)?;
            let total = records.len();
            let writer = RecordWriter::new(client.clone()).with_batch_size(config.batch_size);
            writer.import_person_records(records, total).await?;
        }
        Command::ImportOrgs { source } => {
            let file = csv_file(&source, CONTRACTS_CSV)?;
            info!("Setting constraints...");
            migrate::migrate(&client).await?;
            info!("Importing organizations...");
            let orgs = rows::organization_rows(&file)?;
            let total = orgs.len();
            let writer = RecordWriter::new(client.clone()).with_batch_size(config.batch_size);
            writer.import_organizations(orgs, total).await?;
        }
        Command::ResolvePeople => {
            let pipeline = ResolutionPipeline::new(client.clone(), EntityKind::Person)
                .with_batch_size(config.batch_size);
            let stats = pipeline.run().await?;
            println!("{stats}");
        }
        Command::ResolveOrgs => {
            let pipeline = ResolutionPipeline::new(client.clone(), EntityKind::Organization)
                .with_batch_size(config.batch_size);
            let stats = pipeline.run().await?;
            println!("{stats}");
        }
        Command::Watch => {
            let mut watcher = ChangeFeedWatcher::new(client.clone(), &config.neo4j_database);
            watcher.run(cdc::POLL_INTERVAL).await?;
        }
        Command::SimulateBatch { source } => {
            simulate_batch(&client, &config, &source).await?;
        }
        Command::CleanBatch => {
            let watcher = ChangeFeedWatcher::new(client.clone(), &config.neo4j_database);
            let mut resolver = IncrementalResolver::new(client.clone(), watcher);
            info!("Cleaning database updates...");
            resolver.clean_updates().await?;
        }
    }

    Ok(())
}

/// Drives the full incremental flow against a small batch file: import the
/// new records under CDC, then re-resolve only the subgraph they touch.
async fn simulate_batch(client: &GraphClient, config: &Config, source: &Path) -> Result<()> {
    let file = csv_file(source, OWNERS_BATCH_CSV)?;

    let watcher = ChangeFeedWatcher::new(client.clone(), &config.neo4j_database);
    let mut resolver = IncrementalResolver::new(client.clone(), watcher);

    info!("Step 0 - Cleaning updates...");
    resolver.clean_updates().await?;

    info!("Enabling CDC...");
    resolver.enable_cdc().await?;

    info!("Step 1 - Importing records...");
    let records = rows::person_rows(&file)?;
    let total = records.len();
    let writer = RecordWriter::new(client.clone()).with_batch_size(config.batch_size);
    writer.import_person_records(records, total).await?;
    resolver.records_imported()?;

    info!("Step 2 - Detecting similarity between records...");
    let events = resolver.catch_update().await?;
    resolver.process_new_records(&events).await?;

    info!("Step 3 - Marking affected records...");
    let events = resolver.catch_update().await?;
    resolver.mark_affected(&events).await?;

    info!("Step 4 - Removing resolved entities touched by the affected ones...");
    resolver.remove_stale_entities().await?;

    info!("Step 5 - Resolving affected records...");
    resolver.resolve_affected().await?;

    info!("Disabling CDC...");
    resolver.disable_cdc().await?;

    Ok(())
}

fn csv_file(dir: &Path, name: &str) -> Result<PathBuf> {
    if !dir.is_dir() {
        bail!("{} isn't a directory", dir.display());
    }
    let file = dir.join(name);
    if !file.is_file() {
        bail!("{} doesn't exist in {}", file.display(), dir.display());
    }
    Ok(file)
}
