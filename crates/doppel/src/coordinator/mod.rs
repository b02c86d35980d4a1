//! The coordinator process: binds all three channel endpoints and runs
//! the reconciliation loops.
//!
//! Four tasks cooperate. The router drains ingress and classifies
//! messages, job egress feeds collected images to whichever workers are
//! connected, the index consumer moves acknowledged fingerprints into
//! the search index, and the state service answers resume-point
//! requests. A failure in any of them brings the process down; restart
//! is the recovery mechanism.

pub mod index_consumer;
pub mod router;
pub mod state_service;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use index_consumer::IndexConsumer;
pub use router::Router;

use crate::broker::DeliveryQueue;
use crate::config::TransportConfig;
use crate::db::{status_repo, Database};
use crate::error::DoppelError;
use crate::index::SearchIndex;
use crate::messages::{CollectedImage, ImageStatus};
use crate::transport::{FanInReceiver, FanOutSender, QueueListener};

/// Collected images waiting for a worker slot. Bounded so a stalled
/// worker fleet backpressures ingress instead of growing the heap.
const JOB_QUEUE_CAPACITY: usize = 64;

/// Ingress messages buffered ahead of the router.
const INGRESS_CAPACITY: usize = 64;

pub async fn run(
    db: Database,
    transport: &TransportConfig,
    search_index: Arc<dyn SearchIndex>,
    cancel: CancellationToken,
) -> Result<(), DoppelError> {
    log_status_summary(&db).await?;

    let jobs_out = FanOutSender::bind(&transport.job_endpoint).await?;
    let ingress = FanInReceiver::bind(&transport.ingress_endpoint, INGRESS_CAPACITY).await?;
    let state_listener = QueueListener::bind(&transport.state_endpoint).await?;
    info!(
        "Coordinator listening (jobs {}, ingress {}, state {})",
        transport.job_endpoint, transport.ingress_endpoint, transport.state_endpoint
    );

    let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let deliveries = DeliveryQueue::new();

    let router = Router::new(db.clone(), jobs_tx, deliveries.clone());
    let consumer = IndexConsumer::new(deliveries, search_index, db.clone());

    tokio::try_join!(
        router.run(ingress, cancel.clone()),
        forward_jobs(jobs_out, jobs_rx, cancel.clone()),
        consumer.run(cancel.clone()),
        state_service::run(state_listener, db, cancel),
    )?;
    Ok(())
}

/// Moves queued jobs onto the fan-out socket. Kept apart from the
/// router so a send that waits for a worker never blocks ingress.
async fn forward_jobs(
    mut jobs_out: FanOutSender,
    mut jobs: mpsc::Receiver<CollectedImage>,
    cancel: CancellationToken,
) -> Result<(), DoppelError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Job egress stopping");
                return Ok(());
            }
            job = jobs.recv() => match job {
                Some(job) => {
                    jobs_out.send(&job.to_frames()).await?;
                    debug!("Dispatched job for {}", job.image);
                }
                // The router owns the sender; its exit carries the error.
                None => return Ok(()),
            },
        }
    }
}

async fn log_status_summary(db: &Database) -> Result<(), DoppelError> {
    let (processed, faulted, indexed) = db
        .run(|db| {
            Ok((
                status_repo::count_by_status(db, ImageStatus::Processed)?,
                status_repo::count_by_status(db, ImageStatus::Faulted)?,
                status_repo::count_by_status(db, ImageStatus::Indexed)?,
            ))
        })
        .await?;
    info!(
        "Status store: {} indexed, {} processed, {} faulted",
        indexed, processed, faulted
    );

    let latest = db.run(|db| status_repo::recent(db, 1)).await?;
    if let Some(row) = latest.first() {
        info!(
            "Most recent activity: {} {} at {}",
            row.status, row.link, row.timestamp
        );
    }
    Ok(())
}
