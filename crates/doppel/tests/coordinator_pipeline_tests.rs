//! Full pipeline tests: producer push, coordinator routing, worker
//! fingerprinting, index reconciliation, resume-point state. Fixed
//! loopback ports, so these run serially.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use doppel::config::TransportConfig;
use doppel::coordinator;
use doppel::db::{state_repo, Database};
use doppel::index::{IndexError, IndexedImage, SearchIndex};
use doppel::messages::CollectedImage;
use doppel::transport::{PushQueue, StateClient};
use doppel::worker;

use common::{png_bytes, test_url, wait_for_status};

const JOB_ENDPOINT: &str = "127.0.0.1:42971";
const INGRESS_ENDPOINT: &str = "127.0.0.1:42972";
const STATE_ENDPOINT: &str = "127.0.0.1:42973";

fn transport() -> TransportConfig {
    TransportConfig {
        job_endpoint: JOB_ENDPOINT.to_string(),
        ingress_endpoint: INGRESS_ENDPOINT.to_string(),
        state_endpoint: STATE_ENDPOINT.to_string(),
    }
}

/// Records indexed documents after a short delay, standing in for a
/// remote index's latency.
struct SlowRecordingIndex {
    docs: Mutex<Vec<IndexedImage>>,
    delay: Duration,
}

impl SlowRecordingIndex {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            docs: Mutex::new(Vec::new()),
            delay,
        })
    }
}

#[async_trait]
impl SearchIndex for SlowRecordingIndex {
    async fn index(&self, doc: &IndexedImage) -> Result<(), IndexError> {
        tokio::time::sleep(self.delay).await;
        self.docs.lock().unwrap().push(doc.clone());
        Ok(())
    }
}

#[tokio::test]
#[serial]
async fn test_collected_image_ends_up_indexed() {
    let db = Database::open_in_memory().unwrap();
    let index = SlowRecordingIndex::new(Duration::from_millis(100));
    let cancel = CancellationToken::new();

    let coordinator_task = tokio::spawn({
        let db = db.clone();
        let index = index.clone();
        let cancel = cancel.clone();
        async move { coordinator::run(db, &transport(), index, cancel).await }
    });
    // Let the listeners come up before anything connects.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let worker_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            worker::run(
                JOB_ENDPOINT,
                INGRESS_ENDPOINT,
                2,
                Duration::from_secs(5),
                cancel,
            )
            .await
        }
    });

    let mut producer = PushQueue::connect(INGRESS_ENDPOINT).await.unwrap();
    let job = CollectedImage {
        service_name: "booru".to_string(),
        source: test_url("https://booru.example/posts/77"),
        image: test_url("https://static.booru.example/77.png"),
        data: png_bytes(32, 32),
    };
    producer.send(&job.to_frames()).await.unwrap();

    wait_for_status(
        &db,
        "https://booru.example/posts/77",
        "https://static.booru.example/77.png",
        "indexed",
        Duration::from_secs(10),
    )
    .await;

    {
        let docs = index.docs.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].link, "https://static.booru.example/77.png");
        assert_eq!(docs[0].service_name, "booru");
        assert!(!docs[0].signature.is_empty());
        assert!(!docs[0].words.is_empty());
    }

    cancel.cancel();
    coordinator_task.await.unwrap().unwrap();
    worker_task.await.unwrap().unwrap();
}

#[tokio::test]
#[serial]
async fn test_undecodable_image_is_recorded_faulted_and_never_indexed() {
    let db = Database::open_in_memory().unwrap();
    let index = SlowRecordingIndex::new(Duration::ZERO);
    let cancel = CancellationToken::new();

    let coordinator_task = tokio::spawn({
        let db = db.clone();
        let index = index.clone();
        let cancel = cancel.clone();
        async move { coordinator::run(db, &transport(), index, cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let worker_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            worker::run(
                JOB_ENDPOINT,
                INGRESS_ENDPOINT,
                2,
                Duration::from_secs(5),
                cancel,
            )
            .await
        }
    });

    let mut producer = PushQueue::connect(INGRESS_ENDPOINT).await.unwrap();
    let job = CollectedImage {
        service_name: "booru".to_string(),
        source: test_url("https://booru.example/posts/78"),
        image: test_url("https://static.booru.example/78.png"),
        data: b"garbage bytes".to_vec(),
    };
    producer.send(&job.to_frames()).await.unwrap();

    wait_for_status(
        &db,
        "https://booru.example/posts/78",
        "https://static.booru.example/78.png",
        "faulted",
        Duration::from_secs(10),
    )
    .await;
    assert!(index.docs.lock().unwrap().is_empty());

    cancel.cancel();
    coordinator_task.await.unwrap().unwrap();
    worker_task.await.unwrap().unwrap();
}

#[tokio::test]
#[serial]
async fn test_resume_point_round_trip_through_state_service() {
    let db = Database::open_in_memory().unwrap();
    let index = SlowRecordingIndex::new(Duration::ZERO);
    let cancel = CancellationToken::new();

    let coordinator_task = tokio::spawn({
        let db = db.clone();
        let index = index.clone();
        let cancel = cancel.clone();
        async move { coordinator::run(db, &transport(), index, cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut state = StateClient::connect(STATE_ENDPOINT).await.unwrap();
    assert_eq!(state.get("booru").await.unwrap(), None);
    state.set("booru", "4217").await.unwrap();
    assert_eq!(state.get("booru").await.unwrap().as_deref(), Some("4217"));

    // The checkpoint is durable in the coordinator's database.
    assert_eq!(
        state_repo::resume_point(&db, "booru").unwrap().as_deref(),
        Some("4217")
    );

    cancel.cancel();
    coordinator_task.await.unwrap().unwrap();
}
