//! Index consumer: drains fingerprint deliveries into the search index.
//!
//! Acknowledgment comes last: a delivery is acked only after the index
//! write and the status flip both land, so a crash or failure anywhere
//! in between requeues the message. Redelivery of an already-indexed
//! identical document is absorbed by a TTL cache on content hash.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use moka::sync::Cache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{Delivery, DeliveryQueue};
use crate::db::{status_repo, Database};
use crate::error::DoppelError;
use crate::index::{IndexedImage, SearchIndex};
use crate::messages::{FingerprintedImage, ImageStatus, StatusReport};
use crate::signature::ImageSignature;

/// How long an indexed content hash short-circuits redeliveries.
const RECENT_TTL: Duration = Duration::from_secs(600);

/// Upper bound on cached (source, link) entries.
const RECENT_CAPACITY: u64 = 10_000;

/// Pause before requeueing after an index failure, so a down index is
/// polled rather than hammered.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct IndexConsumer {
    queue: DeliveryQueue<FingerprintedImage>,
    index: Arc<dyn SearchIndex>,
    db: Database,
    /// (source, link) of recently indexed documents, to their content hash.
    recently_indexed: Cache<(String, String), String>,
}

impl IndexConsumer {
    pub fn new(
        queue: DeliveryQueue<FingerprintedImage>,
        index: Arc<dyn SearchIndex>,
        db: Database,
    ) -> Self {
        Self {
            queue,
            index,
            db,
            recently_indexed: Cache::builder()
                .max_capacity(RECENT_CAPACITY)
                .time_to_live(RECENT_TTL)
                .build(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), DoppelError> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Index consumer stopping");
                    return Ok(());
                }
                delivery = self.queue.consume() => self.handle(delivery).await?,
            }
        }
    }

    #[tracing::instrument(name = "index.consume", skip_all)]
    async fn handle(&self, delivery: Delivery<FingerprintedImage>) -> Result<(), DoppelError> {
        let image = delivery.message().clone();
        let key = (image.source.to_string(), image.image.to_string());

        if self.recently_indexed.get(&key).as_deref() == Some(image.content_hash.as_str()) {
            debug!("Already indexed {}, acknowledging redelivery", image.image);
            delivery.ack();
            return Ok(());
        }

        // A signature that does not unpack can never be indexed, so
        // requeueing it would loop forever.
        let signature = match ImageSignature::from_bytes(&image.signature) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Dropping fingerprint with bad signature for {}: {}", image.image, e);
                delivery.ack();
                return Ok(());
            }
        };

        let doc = IndexedImage {
            service_name: image.service_name.clone(),
            timestamp: Utc::now(),
            source: image.source.to_string(),
            link: image.image.to_string(),
            signature: base64::engine::general_purpose::STANDARD.encode(&image.signature),
            words: signature.words(),
        };

        if let Err(e) = self.index.index(&doc).await {
            warn!(
                "Index write failed for {} (redelivery {}): {}",
                image.image,
                delivery.redeliveries(),
                e
            );
            tokio::time::sleep(RETRY_DELAY).await;
            return Ok(());
        }

        let report = StatusReport {
            timestamp: Utc::now(),
            service_name: image.service_name.clone(),
            source: image.source.clone(),
            link: image.image.clone(),
            status: ImageStatus::Indexed,
            message: String::new(),
        };
        self.db
            .run(move |db| status_repo::upsert(db, &report))
            .await?;

        self.recently_indexed.insert(key, image.content_hash.clone());
        info!("Indexed {}", image.image);
        delivery.ack();
        Ok(())
    }
}
