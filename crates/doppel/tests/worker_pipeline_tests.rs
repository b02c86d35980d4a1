//! End-to-end worker tests over loopback TCP: a real dispatch loop
//! connected to real fan-out and fan-in endpoints.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use doppel::messages::{CollectedImage, ImageStatus, Message};
use doppel::transport::{FanInReceiver, FanOutSender};
use doppel::worker;

use common::{png_bytes, test_url};

async fn recv_message(ingress: &mut FanInReceiver) -> Message {
    let frames = tokio::time::timeout(Duration::from_secs(5), ingress.recv())
        .await
        .expect("Timed out waiting for worker output")
        .expect("Ingress closed");
    Message::from_frames(&frames).expect("Worker sent unparseable frames")
}

struct WorkerRig {
    jobs_out: FanOutSender,
    ingress: FanInReceiver,
    cancel: CancellationToken,
    worker: tokio::task::JoinHandle<Result<(), doppel::worker::DispatchError>>,
}

async fn start_worker(limit: usize) -> WorkerRig {
    let jobs_out = FanOutSender::bind("127.0.0.1:0").await.unwrap();
    let job_addr = jobs_out.local_addr().to_string();
    let ingress = FanInReceiver::bind("127.0.0.1:0", 16).await.unwrap();
    let ingress_addr = ingress.local_addr().to_string();

    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            worker::run(
                &job_addr,
                &ingress_addr,
                limit,
                Duration::from_secs(5),
                cancel,
            )
            .await
        }
    });

    WorkerRig {
        jobs_out,
        ingress,
        cancel,
        worker,
    }
}

#[tokio::test]
async fn test_valid_job_produces_fingerprint_then_processed_status() {
    let mut rig = start_worker(4).await;

    let job = CollectedImage {
        service_name: "archive".to_string(),
        source: test_url("file:///srv/images/"),
        image: test_url("file:///srv/images/a.png"),
        data: png_bytes(24, 24),
    };
    rig.jobs_out.send(&job.to_frames()).await.unwrap();

    match recv_message(&mut rig.ingress).await {
        Message::Fingerprinted(fp) => {
            assert_eq!(fp.image, job.image);
            assert_eq!(fp.service_name, "archive");
            assert_eq!(fp.content_hash.len(), 64);
            assert!(!fp.signature.is_empty());
        }
        other => panic!("Expected fingerprint first, got {:?}", other),
    }
    match recv_message(&mut rig.ingress).await {
        Message::Status(report) => {
            assert_eq!(report.status, ImageStatus::Processed);
            assert_eq!(report.link, job.image);
            assert!(report.message.is_empty());
        }
        other => panic!("Expected status report, got {:?}", other),
    }

    rig.cancel.cancel();
    rig.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_undecodable_job_produces_faulted_status_only() {
    let mut rig = start_worker(4).await;

    let bad_job = CollectedImage {
        service_name: "archive".to_string(),
        source: test_url("file:///srv/images/"),
        image: test_url("file:///srv/images/broken.png"),
        data: b"certainly not an image".to_vec(),
    };
    rig.jobs_out.send(&bad_job.to_frames()).await.unwrap();

    match recv_message(&mut rig.ingress).await {
        Message::Status(report) => {
            assert_eq!(report.status, ImageStatus::Faulted);
            assert_eq!(report.link, bad_job.image);
            assert!(!report.message.is_empty());
        }
        other => panic!("Expected faulted status, got {:?}", other),
    }

    // The worker keeps serving after a faulted job.
    let good_job = CollectedImage {
        service_name: "archive".to_string(),
        source: test_url("file:///srv/images/"),
        image: test_url("file:///srv/images/fine.png"),
        data: png_bytes(16, 16),
    };
    rig.jobs_out.send(&good_job.to_frames()).await.unwrap();

    match recv_message(&mut rig.ingress).await {
        Message::Fingerprinted(fp) => assert_eq!(fp.image, good_job.image),
        other => panic!("Expected fingerprint, got {:?}", other),
    }

    rig.cancel.cancel();
    rig.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_identical_content_yields_identical_fingerprint() {
    let mut rig = start_worker(4).await;

    let data = png_bytes(20, 20);
    let jobs = [
        CollectedImage {
            service_name: "archive".to_string(),
            source: test_url("file:///srv/images/"),
            image: test_url("file:///srv/images/one.png"),
            data: data.clone(),
        },
        CollectedImage {
            service_name: "archive".to_string(),
            source: test_url("file:///srv/images/"),
            image: test_url("file:///srv/images/two.png"),
            data,
        },
    ];
    for job in &jobs {
        rig.jobs_out.send(&job.to_frames()).await.unwrap();
    }

    let mut fingerprints = Vec::new();
    while fingerprints.len() < 2 {
        if let Message::Fingerprinted(fp) = recv_message(&mut rig.ingress).await {
            fingerprints.push(fp);
        }
    }
    fingerprints.sort_by(|a, b| a.image.cmp(&b.image));
    assert_eq!(fingerprints[0].content_hash, fingerprints[1].content_hash);
    assert_eq!(fingerprints[0].signature, fingerprints[1].signature);

    rig.cancel.cancel();
    rig.worker.await.unwrap().unwrap();
}
