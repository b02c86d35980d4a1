//! Collectors: media sources that feed the pipeline.
//!
//! A collector turns an external source (a booru API, a local
//! directory) into batches of `CollectedImage` jobs. The harness owns
//! the plumbing around it: resume-point recovery over the state
//! channel, pushing jobs to the coordinator, and checkpoint
//! advancement after every batch.

pub mod booru;
pub mod directory;
pub mod policy;

pub use booru::{BooruAuth, BooruCollector};
pub use directory::DirectoryCollector;
pub use policy::{with_reauth, with_retry, RetryPolicy, Throttle};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::messages::CollectedImage;
use crate::transport::{PushQueue, StateClient, TransportError};

/// Errors from collectors.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The request did not complete (connect, timeout, body).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote rejected the session credential.
    #[error("Authentication expired")]
    AuthExpired,

    /// Re-login was rejected.
    #[error("Login failed ({status}): {body}")]
    LoginFailed { status: StatusCode, body: String },

    /// The remote answered with an unexpected status.
    #[error("Unexpected response ({status}): {body}")]
    BadResponse { status: StatusCode, body: String },

    /// A URL in an API response, or one built from it, did not parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The stored resume point does not fit this collector's cursor
    /// format. Clearing the service state restarts from scratch.
    #[error("Invalid resume point '{0}'")]
    InvalidCursor(String),

    /// Filesystem error while walking or reading.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection to the coordinator failed.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// One round of collection.
#[derive(Debug, Default)]
pub struct CollectedBatch {
    pub images: Vec<CollectedImage>,
    /// Checkpoint to store once the batch is pushed, if it advanced.
    pub resume_point: Option<String>,
    /// True when the source has nothing more right now.
    pub end_of_stream: bool,
}

/// A source of images.
#[async_trait]
pub trait Collector: Send {
    /// Stable service name, also the key for the resume point.
    fn service_name(&self) -> &str;

    /// Collects the next batch after the given resume point.
    async fn collect(&mut self, resume: Option<String>) -> Result<CollectedBatch, CollectorError>;
}

/// Drives a collector against the coordinator.
///
/// Recovers the resume point over the state channel, then loops:
/// collect a batch, push every image to the coordinator, store the
/// advanced checkpoint. At end of stream, polling collectors sleep
/// `poll` and go again; one-shot collectors (`poll` = None) finish.
/// The shutdown token is observed between batches.
pub async fn run_collector<C: Collector>(
    mut collector: C,
    ingress_endpoint: &str,
    state_endpoint: &str,
    poll: Option<Duration>,
    cancel: CancellationToken,
) -> Result<(), CollectorError> {
    let mut push = PushQueue::connect(ingress_endpoint).await?;
    let mut state = StateClient::connect(state_endpoint).await?;

    let name = collector.service_name().to_string();
    let mut resume = state.get(&name).await?;
    match &resume {
        Some(point) => info!("Collector '{}' resuming from {}", name, point),
        None => info!("Collector '{}' starting from scratch", name),
    }

    while !cancel.is_cancelled() {
        let batch = collector.collect(resume.clone()).await?;

        for image in &batch.images {
            push.send(&image.to_frames()).await?;
        }
        if !batch.images.is_empty() {
            info!("Pushed {} images from '{}'", batch.images.len(), name);
        }

        // Checkpoint only after the batch is on the wire; a crash in
        // between replays the batch.
        if let Some(point) = batch.resume_point {
            state.set(&name, &point).await?;
            resume = Some(point);
        }

        if batch.end_of_stream {
            match poll {
                None => {
                    info!("Collector '{}' reached end of stream", name);
                    break;
                }
                Some(interval) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }

    Ok(())
}
