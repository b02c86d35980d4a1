//! Collector process: harvests a configured source and feeds the
//! coordinator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use doppel::collector::directory::DEFAULT_BATCH_SIZE;
use doppel::collector::{run_collector, BooruAuth, BooruCollector, DirectoryCollector};
use doppel::config::{load_config, resolve_config_path, CollectorKind};
use doppel::error::{ConfigError, DoppelError};
use doppel::logging;

#[derive(Parser)]
#[command(name = "doppel-collector", version)]
#[command(about = "Harvests images from a configured source into the pipeline")]
struct Args {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("Starting doppel-collector v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Args::parse()).await {
        error!("Collector failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<(), DoppelError> {
    let config_path = resolve_config_path(args.config)?;
    let config = load_config(&config_path)?;

    let collector_config = config.collector.ok_or_else(|| ConfigError::Validation {
        message: "The collector requires a 'collector' section".to_string(),
    })?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let ingress = &config.transport.ingress_endpoint;
    let state = &config.transport.state_endpoint;
    let poll = collector_config.poll();

    match collector_config.kind {
        CollectorKind::Booru => {
            let booru = collector_config
                .booru
                .as_ref()
                .ok_or_else(|| ConfigError::Validation {
                    message: "collector.kind is \"booru\" but no booru section is configured"
                        .to_string(),
                })?;
            let base_url = Url::parse(&booru.base_url).map_err(|e| ConfigError::InvalidUrl {
                field: "collector.booru.base_url".to_string(),
                reason: e.to_string(),
            })?;
            let auth = booru
                .credentials()?
                .map(|(login, api_key)| BooruAuth { login, api_key });

            let collector = BooruCollector::new(
                collector_config.service_name.clone(),
                base_url,
                booru.page_size,
                collector_config.rate_limit_per_sec,
                auth,
            )?;
            run_collector(collector, ingress, state, poll, cancel).await?;
        }
        CollectorKind::Directory => {
            let directory =
                collector_config
                    .directory
                    .as_ref()
                    .ok_or_else(|| ConfigError::Validation {
                        message:
                            "collector.kind is \"directory\" but no directory section is configured"
                                .to_string(),
                    })?;

            let collector = DirectoryCollector::new(
                collector_config.service_name.clone(),
                directory.root.clone(),
                DEFAULT_BATCH_SIZE,
            )?;
            run_collector(collector, ingress, state, poll, cancel).await?;
        }
    }

    info!("Collector stopped");
    Ok(())
}
