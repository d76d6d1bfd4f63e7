//! pagevault command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pagevault::config::{load_settings, Settings};
use pagevault::repository;
use pagevault::server;
use pagevault::services::{ArchiveOutcome, Services};

/// pagevault - file and bookmark vault with offline webpage snapshots
#[derive(Parser)]
#[command(name = "pagevault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the data directory from the config file
    #[arg(long, global = true, env = "PAGEVAULT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with background archive workers
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 3030)]
        port: u16,
    },
    /// Bookmark a URL and archive it immediately
    Add {
        /// Owner of the new record
        owner: String,

        /// Page to bookmark
        url: String,
    },
    /// Re-archive an existing bookmark record
    Archive {
        /// Record id of the bookmark
        record_id: String,

        /// Owner of the record
        #[arg(short, long)]
        owner: String,
    },
    /// Print the visible text of a cached page
    Text {
        /// Record id of the bookmark
        record_id: String,

        /// Owner of the record
        #[arg(short, long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagevault=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings().await;
    if let Some(data_dir) = cli.data_dir {
        settings = settings_with_data_dir(settings, data_dir);
    }

    match cli.command {
        Commands::Serve { host, port } => server::serve(&settings, &host, port).await,
        Commands::Add { owner, url } => cmd_add(&settings, &owner, &url).await,
        Commands::Archive { record_id, owner } => cmd_archive(&settings, &owner, &record_id).await,
        Commands::Text { record_id, owner } => cmd_text(&settings, &owner, &record_id).await,
    }
}

fn settings_with_data_dir(settings: Settings, data_dir: PathBuf) -> Settings {
    Settings {
        blobs_dir: data_dir.join("blobs"),
        data_dir,
        ..settings
    }
}

async fn open_services(settings: &Settings) -> anyhow::Result<Services> {
    let (pool, blobs) = repository::open(settings).await?;
    Services::from_settings(settings, pool, blobs)
}

async fn cmd_add(settings: &Settings, owner: &str, url: &str) -> anyhow::Result<()> {
    let services = open_services(settings).await?;
    let (record, _) = services
        .records
        .create_bookmark(owner, url)
        .await
        .context("Failed to create bookmark")?;
    println!("{}  {}", record.id, record.filename);

    let bookmark = services.records.cache_status(owner, &record.id).await?;
    match &bookmark.cache_error {
        Some(error) => println!("error: {}", error),
        None => {
            println!("{}", bookmark.state().as_str());
            for name in bookmark.cached_file_list() {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}

async fn cmd_archive(settings: &Settings, owner: &str, record_id: &str) -> anyhow::Result<()> {
    let services = open_services(settings).await?;
    let bookmark = services.records.ensure_bookmark(owner, record_id).await?;

    match services.archive.archive_detached(owner, &bookmark.id).await? {
        ArchiveOutcome::Cached {
            artifacts,
            skipped_assets,
        } => println!(
            "cached: {} files ({} assets skipped)",
            artifacts, skipped_assets
        ),
        ArchiveOutcome::Failed { error } => println!("error: {}", error),
        ArchiveOutcome::KeptPrevious { error } => {
            println!("kept previous snapshot: {}", error)
        }
        ArchiveOutcome::Unchanged(state) => println!("{}", state.as_str()),
    }
    Ok(())
}

async fn cmd_text(settings: &Settings, owner: &str, record_id: &str) -> anyhow::Result<()> {
    let services = open_services(settings).await?;
    match services.retrieval.page_text(owner, record_id).await? {
        Some(text) => println!("{}", text),
        None => anyhow::bail!("No cached page text for {}", record_id),
    }
    Ok(())
}
