//! Worker process: pulls crawl jobs, fingerprints them, pushes the
//! results back.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use doppel::config::{load_config, resolve_config_path};
use doppel::error::DoppelError;
use doppel::{logging, worker};

#[derive(Parser)]
#[command(name = "doppel-worker", version)]
#[command(about = "Fingerprints collected images under a bounded concurrency limit")]
struct Args {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("Starting doppel-worker v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Args::parse()).await {
        error!("Worker failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<(), DoppelError> {
    let config_path = resolve_config_path(args.config)?;
    let config = load_config(&config_path)?;

    let limit = worker::dispatch_limit(config.worker.concurrency_multiplier);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    worker::run(
        &config.transport.job_endpoint,
        &config.transport.ingress_endpoint,
        limit,
        config.worker.shutdown_grace(),
        cancel,
    )
    .await?;
    info!("Worker stopped");
    Ok(())
}
