//! Ingress router: classifies incoming frames and moves each message to
//! its handler.
//!
//! Collected images go onto the bounded job channel feeding the fan-out
//! socket, fingerprints are published for the index consumer, and status
//! reports are written straight to the database. Frames that do not
//! parse are logged and dropped so one bad producer cannot wedge the
//! pipeline.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::DeliveryQueue;
use crate::db::{status_repo, Database};
use crate::error::DoppelError;
use crate::messages::{CollectedImage, FingerprintedImage, Message};
use crate::transport::{FanInReceiver, TransportError};

pub struct Router {
    db: Database,
    jobs: mpsc::Sender<CollectedImage>,
    deliveries: DeliveryQueue<FingerprintedImage>,
}

impl Router {
    pub fn new(
        db: Database,
        jobs: mpsc::Sender<CollectedImage>,
        deliveries: DeliveryQueue<FingerprintedImage>,
    ) -> Self {
        Self {
            db,
            jobs,
            deliveries,
        }
    }

    pub async fn run(
        self,
        mut ingress: FanInReceiver,
        cancel: CancellationToken,
    ) -> Result<(), DoppelError> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Router stopping");
                    return Ok(());
                }
                frames = ingress.recv() => match frames {
                    Some(frames) => self.route(&frames).await?,
                    None => return Err(TransportError::Closed.into()),
                },
            }
        }
    }

    async fn route(&self, frames: &[Vec<u8>]) -> Result<(), DoppelError> {
        let message = match Message::from_frames(frames) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable message: {}", e);
                return Ok(());
            }
        };

        match message {
            Message::Collected(image) => {
                debug!("Queueing job for {}", image.image);
                self.jobs
                    .send(image)
                    .await
                    .map_err(|_| TransportError::Closed)?;
            }
            Message::Fingerprinted(image) => {
                debug!("Fingerprint received for {}", image.image);
                self.deliveries.publish(image);
            }
            Message::Status(report) => {
                debug!(
                    "Status {} for {} from {}",
                    report.status, report.link, report.service_name
                );
                self.db
                    .run(move |db| status_repo::upsert(db, &report))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use url::Url;

    use crate::messages::{ImageStatus, StatusReport};

    fn test_url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn test_router() -> (Router, mpsc::Receiver<CollectedImage>, DeliveryQueue<FingerprintedImage>, Database) {
        let db = Database::open_in_memory().unwrap();
        let (jobs_tx, jobs_rx) = mpsc::channel(4);
        let deliveries = DeliveryQueue::new();
        let router = Router::new(db.clone(), jobs_tx, deliveries.clone());
        (router, jobs_rx, deliveries, db)
    }

    #[tokio::test]
    async fn test_collected_image_becomes_job() {
        let (router, mut jobs, _deliveries, _db) = test_router();
        let image = CollectedImage {
            service_name: "booru".to_string(),
            source: test_url("https://booru.example/posts/1"),
            image: test_url("https://static.booru.example/1.png"),
            data: vec![1, 2, 3],
        };

        router.route(&image.to_frames()).await.unwrap();

        let job = jobs.recv().await.unwrap();
        assert_eq!(job.image.as_str(), "https://static.booru.example/1.png");
        assert_eq!(job.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fingerprint_is_published_for_indexing() {
        let (router, _jobs, deliveries, _db) = test_router();
        let image = FingerprintedImage {
            service_name: "booru".to_string(),
            source: test_url("https://booru.example/posts/1"),
            image: test_url("https://static.booru.example/1.png"),
            signature: vec![0; 8],
            content_hash: "deadbeef".to_string(),
        };

        router.route(&image.to_frames()).await.unwrap();

        assert_eq!(deliveries.len(), 1);
        let delivery = deliveries.consume().await;
        assert_eq!(delivery.message().content_hash, "deadbeef");
        delivery.ack();
    }

    #[tokio::test]
    async fn test_status_report_is_persisted() {
        let (router, _jobs, _deliveries, db) = test_router();
        let report = StatusReport {
            timestamp: Utc.with_ymd_and_hms(2026, 8, 2, 9, 30, 0).unwrap(),
            service_name: "booru".to_string(),
            source: test_url("https://booru.example/posts/1"),
            link: test_url("https://static.booru.example/1.png"),
            status: ImageStatus::Faulted,
            message: "decode failed".to_string(),
        };

        router.route(&report.to_frames()).await.unwrap();

        let row = status_repo::find(
            &db,
            "https://booru.example/posts/1",
            "https://static.booru.example/1.png",
        )
        .unwrap()
        .unwrap();
        assert_eq!(row.status, "faulted");
        assert_eq!(row.message, "decode failed");
    }

    #[tokio::test]
    async fn test_garbage_frames_are_dropped() {
        let (router, mut jobs, deliveries, _db) = test_router();

        let garbage = vec![b"not-a-kind".to_vec(), b"x".to_vec()];
        router.route(&garbage).await.unwrap();
        router.route(&[]).await.unwrap();

        assert!(deliveries.is_empty());
        assert!(jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_job_channel_is_fatal() {
        let (router, jobs, _deliveries, _db) = test_router();
        drop(jobs);

        let image = CollectedImage {
            service_name: "booru".to_string(),
            source: test_url("https://booru.example/posts/1"),
            image: test_url("https://static.booru.example/1.png"),
            data: Vec::new(),
        };
        let result = router.route(&image.to_frames()).await;
        assert!(result.is_err());
    }
}
