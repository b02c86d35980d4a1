//! Coordinator process: owns the database, the channel endpoints, and
//! the search index connection.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use doppel::config::{load_config, resolve_config_path};
use doppel::db::Database;
use doppel::error::{ConfigError, DoppelError};
use doppel::index::HttpSearchIndex;
use doppel::{coordinator, logging};

#[derive(Parser)]
#[command(name = "doppel-coordinator", version)]
#[command(about = "Routes crawl jobs, reconciles fingerprints into the search index")]
struct Args {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("Starting doppel-coordinator v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Args::parse()).await {
        error!("Coordinator failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<(), DoppelError> {
    let config_path = resolve_config_path(args.config)?;
    let config = load_config(&config_path)?;

    let db = Database::open(&config.database.path)?;
    info!("Database open at {}", config.database.path.display());

    let index_config = config.index.as_ref().ok_or_else(|| ConfigError::Validation {
        message: "The coordinator requires an 'index' section".to_string(),
    })?;
    let base_url = Url::parse(&index_config.base_url).map_err(|e| ConfigError::InvalidUrl {
        field: "index.base_url".to_string(),
        reason: e.to_string(),
    })?;
    let search_index = Arc::new(HttpSearchIndex::new(
        base_url,
        index_config.index_name.clone(),
        index_config.credentials()?,
    )?);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    coordinator::run(db, &config.transport, search_index, cancel).await?;
    info!("Coordinator stopped");
    Ok(())
}
