use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_storage::ListingStore;
use jobwatch_sync::{Scheduler, SnapshotExporter, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobwatch-cli")]
#[command(about = "Watch a job board, keep every listing, report the new ones")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a cycle every interval until Ctrl-C or SIGTERM.
    Run,
    /// Run a single cycle and print its summary.
    Once {
        #[arg(long)]
        json: bool,
    },
    /// Create or upgrade the listing database.
    Migrate,
    /// Rewrite the snapshot page from the stored listings.
    Export,
    /// Serve the search view.
    Serve {
        #[arg(long, env = "JOBWATCH_WEB_PORT", default_value_t = 8000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = SyncPipeline::from_config(&config).await?;
            let cycles = Scheduler::new(config.interval)
                .run_until_shutdown(&pipeline)
                .await;
            info!(cycles, "stopped");
        }
        Commands::Once { json } => {
            let pipeline = SyncPipeline::from_config(&config).await?;
            let summary = pipeline.run_once().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "cycle complete: run_id={} fetched={} extracted={} skipped={} new={} refreshed={}",
                    summary.run_id,
                    summary.fetched,
                    summary.extracted,
                    summary.skipped_cards,
                    summary.inserted.len(),
                    summary.refreshed
                );
                for listing in &summary.inserted {
                    println!("  + {} | {} | {}", listing.title, listing.company, listing.url);
                }
            }
        }
        Commands::Migrate => {
            let store = open_store(&config).await?;
            println!("database ready: {} ({} listings)", config.database_url, store.count().await?);
        }
        Commands::Export => {
            let store = open_store(&config).await?;
            let listings = store.all().await?;
            let path = SnapshotExporter::new(&config.snapshot_path)
                .export(&listings, chrono::Utc::now())
                .await?;
            println!("snapshot written: {} ({} listings)", path.display(), listings.len());
        }
        Commands::Serve { port } => {
            let store = open_store(&config).await?;
            jobwatch_web::serve(store, port).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &SyncConfig) -> Result<ListingStore> {
    ListingStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening listing store {}", config.database_url))
}
