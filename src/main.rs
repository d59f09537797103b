use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedmill::config::Config;
use feedmill::feed::Fetcher;
use feedmill::ingest::{read_document, IngestOptions, Ingestor};
use feedmill::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmill"))
}

#[derive(Parser, Debug)]
#[command(name = "feedmill", about = "Ingest RSS/Atom feeds into a deduplicated news store")]
struct Args {
    /// Config file (default: ~/.config/feedmill/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides `database_path` from the config
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a JSON source list into the source catalog
    Import {
        /// Source list document (default: `sources_file` from the config)
        file: Option<PathBuf>,
    },
    /// Run one ingestion pass over every configured source
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedmill=info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("news.db")
        }
    };
    let db = open_database(&db_path).await?;

    let result = match args.command {
        Command::Import { file } => {
            let file = file.unwrap_or_else(|| config.sources_file.clone());
            import_sources(&db, &file).await
        }
        Command::Run => run_ingestion(db.clone(), &config).await,
    };

    db.close().await;
    result
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!(
                "Database {} is locked by another process. Wait for it to finish and try again.",
                path.display()
            )
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn import_sources(db: &Database, file: &Path) -> Result<()> {
    let sources = read_document(file)
        .with_context(|| format!("Failed to load source list {}", file.display()))?;

    let urls: usize = sources.iter().map(|s| s.url_count()).sum();
    let written = db
        .upsert_sources(&sources)
        .await
        .context("Failed to store feed sources")?;

    tracing::info!(categories = written, urls = urls, file = %file.display(), "Imported feed sources");
    println!("Imported {} categories ({} feed URLs) from {}", written, urls, file.display());
    Ok(())
}

async fn run_ingestion(db: Database, config: &Config) -> Result<()> {
    let fetcher = Fetcher::new(config.fetch_timeout(), config.max_feed_bytes)
        .context("Failed to build HTTP client")?;

    let db = Arc::new(db);
    let ingestor = Ingestor::new(db.clone(), db, fetcher, IngestOptions::from(config));

    let report = ingestor.run().await.context("Ingestion run failed")?;
    println!("{}", report);
    Ok(())
}
