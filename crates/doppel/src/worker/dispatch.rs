//! Bounded dispatch loop.
//!
//! Pulls crawl jobs from the job queue, fingerprints each on the
//! blocking pool, and pushes the result plus a status report back
//! through the ingress queue. New jobs are only taken off the wire
//! while the in-flight table has room, so backpressure lands on the
//! TCP socket instead of on memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::messages::{CollectedImage, FingerprintedImage, ImageStatus, StatusReport};
use crate::signature::{self, Fingerprint, FingerprintError};
use crate::transport::{PullQueue, PushQueue, TransportError};

use super::inflight::{Admission, InFlightTable, JobKey};
use super::DispatchError;

/// Computes fingerprints for raw image bytes.
pub trait Fingerprinter: Send + Sync + 'static {
    fn fingerprint(
        &self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Fingerprint, FingerprintError>;
}

/// Production fingerprinter backed by the signature pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureFingerprinter;

impl Fingerprinter for SignatureFingerprinter {
    fn fingerprint(
        &self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Fingerprint, FingerprintError> {
        signature::fingerprint(data, cancel)
    }
}

/// A finished fingerprinting job, ready to be reported.
struct Completion {
    service_name: String,
    source: Url,
    link: Url,
    outcome: Result<Fingerprint, FingerprintError>,
}

/// Builds the outgoing messages for a completion: the fingerprinted
/// image (on success) and the status report. Cancelled jobs never
/// reach this point.
fn completion_messages(done: &Completion) -> (Option<FingerprintedImage>, StatusReport) {
    match &done.outcome {
        Ok(fp) => (
            Some(FingerprintedImage {
                service_name: done.service_name.clone(),
                source: done.source.clone(),
                image: done.link.clone(),
                signature: fp.signature.clone(),
                content_hash: fp.content_hash.clone(),
            }),
            StatusReport {
                timestamp: Utc::now(),
                service_name: done.service_name.clone(),
                source: done.source.clone(),
                link: done.link.clone(),
                status: ImageStatus::Processed,
                message: String::new(),
            },
        ),
        Err(e) => (
            None,
            StatusReport {
                timestamp: Utc::now(),
                service_name: done.service_name.clone(),
                source: done.source.clone(),
                link: done.link.clone(),
                status: ImageStatus::Faulted,
                message: e.to_string(),
            },
        ),
    }
}

/// Sends the messages for one completion. The fingerprinted image goes
/// out before its status report so the coordinator never sees a
/// processed status for an image it has no fingerprint for.
async fn report(push: &mut PushQueue, done: Completion) -> Result<(), TransportError> {
    if matches!(done.outcome, Err(FingerprintError::Cancelled)) {
        debug!("Job for {} cancelled during shutdown", done.link);
        return Ok(());
    }

    let (fingerprinted, status) = completion_messages(&done);
    if let Some(msg) = &fingerprinted {
        push.send(&msg.to_frames()).await?;
    } else {
        warn!("Fingerprinting failed for {}: {}", done.link, status.message);
    }
    push.send(&status.to_frames()).await?;
    Ok(())
}

/// The worker's dispatch loop.
pub struct DispatchLoop<F> {
    fingerprinter: Arc<F>,
    limit: usize,
    grace: Duration,
}

impl<F: Fingerprinter> DispatchLoop<F> {
    pub fn new(fingerprinter: F, limit: usize, grace: Duration) -> Self {
        Self {
            fingerprinter: Arc::new(fingerprinter),
            limit: limit.max(1),
            grace,
        }
    }

    /// Runs until cancelled or the transport fails. On cancellation,
    /// in-flight jobs are drained for up to the grace period before
    /// the loop gives up on them.
    pub async fn run(
        self,
        mut pull: PullQueue,
        mut push: PushQueue,
        cancel: CancellationToken,
    ) -> Result<(), DispatchError> {
        let mut inflight = InFlightTable::new(self.limit);
        let (intake_tx, mut intake_rx) =
            mpsc::channel::<Result<Vec<Vec<u8>>, TransportError>>(self.limit);
        let (completion_tx, mut completion_rx) = mpsc::channel::<Completion>(self.limit);

        // Socket reads happen on their own task so a full in-flight
        // table pauses intake without blocking completions.
        let reader = tokio::spawn(async move {
            loop {
                match pull.recv().await {
                    Ok(Some(frames)) => {
                        if intake_tx.send(Ok(frames)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = intake_tx.send(Err(TransportError::Closed)).await;
                        break;
                    }
                    Err(e) => {
                        let _ = intake_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        info!("Dispatch loop started (limit {})", inflight.capacity());

        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown requested, draining {} in-flight jobs", inflight.len());
                    break Ok(());
                }

                Some(done) = completion_rx.recv() => {
                    inflight.release(&(done.source.clone(), done.link.clone()));
                    if let Err(e) = report(&mut push, done).await {
                        break Err(DispatchError::Transport(e));
                    }
                }

                maybe = intake_rx.recv(), if inflight.has_capacity() => {
                    match maybe {
                        Some(Ok(frames)) => {
                            self.start_job(frames, &mut inflight, &completion_tx, &cancel);
                        }
                        Some(Err(e)) => break Err(DispatchError::Transport(e)),
                        None => break Err(DispatchError::ChannelClosed),
                    }
                }
            }
        };

        reader.abort();

        match result {
            Ok(()) => self.drain(inflight, completion_rx, push).await,
            Err(e) => Err(e),
        }
    }

    /// Parses one job message and hands it to the blocking pool. Jobs
    /// that do not parse, or whose identity is already in flight, are
    /// dropped with a log line.
    fn start_job(
        &self,
        frames: Vec<Vec<u8>>,
        inflight: &mut InFlightTable,
        completion_tx: &mpsc::Sender<Completion>,
        cancel: &CancellationToken,
    ) {
        let job = match CollectedImage::from_frames(&frames) {
            Ok(job) => job,
            Err(e) => {
                warn!("Dropping malformed job message: {}", e);
                return;
            }
        };

        let key: JobKey = (job.source.clone(), job.image.clone());
        match inflight.try_admit(&key) {
            Admission::Admitted => {}
            Admission::Duplicate => {
                warn!("Dropping job for {}: identity already in flight", job.image);
                return;
            }
            Admission::Full => {
                warn!("Dropping job for {}: in-flight table full", job.image);
                return;
            }
        }

        debug!("Fingerprinting {} ({} bytes)", job.image, job.data.len());

        let fingerprinter = Arc::clone(&self.fingerprinter);
        let tx = completion_tx.clone();
        let job_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = fingerprinter.fingerprint(&job.data, &job_cancel);
            let _ = tx.blocking_send(Completion {
                service_name: job.service_name,
                source: job.source,
                link: job.image,
                outcome,
            });
        });
    }

    async fn drain(
        &self,
        mut inflight: InFlightTable,
        mut completion_rx: mpsc::Receiver<Completion>,
        mut push: PushQueue,
    ) -> Result<(), DispatchError> {
        let deadline = Instant::now() + self.grace;
        while !inflight.is_empty() {
            match tokio::time::timeout_at(deadline, completion_rx.recv()).await {
                Ok(Some(done)) => {
                    inflight.release(&(done.source.clone(), done.link.clone()));
                    if let Err(e) = report(&mut push, done).await {
                        warn!("Failed to report completion during drain: {}", e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Grace period elapsed with {} jobs still in flight",
                        inflight.len()
                    );
                    break;
                }
            }
        }

        info!("Dispatch loop stopped");
        Ok(())
    }
}

/// Connects to the coordinator's job and ingress endpoints and runs
/// the dispatch loop with the production fingerprinter.
pub async fn run(
    job_endpoint: &str,
    ingress_endpoint: &str,
    limit: usize,
    grace: Duration,
    cancel: CancellationToken,
) -> Result<(), DispatchError> {
    let pull = PullQueue::connect(job_endpoint).await?;
    let push = PushQueue::connect(ingress_endpoint).await?;
    info!(
        "Worker pulling jobs from {}, pushing results to {}",
        job_endpoint, ingress_endpoint
    );

    DispatchLoop::new(SignatureFingerprinter, limit, grace)
        .run(pull, push, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};

    use crate::transport::{FanInReceiver, FanOutSender};

    fn sample_completion(outcome: Result<Fingerprint, FingerprintError>) -> Completion {
        Completion {
            service_name: "booru".to_string(),
            source: Url::parse("https://booru.example/posts.json").unwrap(),
            link: Url::parse("https://booru.example/img/1.png").unwrap(),
            outcome,
        }
    }

    #[test]
    fn test_completion_messages_success() {
        let done = sample_completion(Ok(Fingerprint {
            content_hash: "abc123".to_string(),
            signature: vec![1, 2, 3],
        }));

        let (fingerprinted, status) = completion_messages(&done);
        let fingerprinted = fingerprinted.unwrap();
        assert_eq!(fingerprinted.content_hash, "abc123");
        assert_eq!(fingerprinted.signature, vec![1, 2, 3]);
        assert_eq!(fingerprinted.service_name, "booru");
        assert_eq!(fingerprinted.image.as_str(), "https://booru.example/img/1.png");
        assert_eq!(status.status, ImageStatus::Processed);
        assert_eq!(status.link, fingerprinted.image);
    }

    #[test]
    fn test_completion_messages_failure() {
        let done = sample_completion(Err(FingerprintError::Decode("bad png".to_string())));

        let (fingerprinted, status) = completion_messages(&done);
        assert!(fingerprinted.is_none());
        assert_eq!(status.status, ImageStatus::Faulted);
        assert!(status.message.contains("bad png"));
    }

    #[tokio::test]
    async fn test_malformed_job_not_admitted() {
        let dispatch = DispatchLoop::new(SignatureFingerprinter, 2, Duration::from_secs(1));
        let mut inflight = InFlightTable::new(2);
        let (tx, _rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();

        dispatch.start_job(vec![b"garbage".to_vec()], &mut inflight, &tx, &cancel);

        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_job_admitted_once() {
        let dispatch = DispatchLoop::new(SignatureFingerprinter, 4, Duration::from_secs(1));
        let mut inflight = InFlightTable::new(4);
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let job = CollectedImage {
            service_name: "booru".to_string(),
            source: Url::parse("https://booru.example/posts.json").unwrap(),
            image: Url::parse("https://booru.example/img/1.png").unwrap(),
            data: b"not an image".to_vec(),
        };

        dispatch.start_job(job.to_frames(), &mut inflight, &tx, &cancel);
        assert_eq!(inflight.len(), 1);

        dispatch.start_job(job.to_frames(), &mut inflight, &tx, &cancel);
        assert_eq!(inflight.len(), 1);
    }

    /// Holds every job inside `fingerprint` until a permit is granted,
    /// recording how many jobs were ever inside at once.
    #[derive(Clone)]
    struct GatedFingerprinter {
        permits: Arc<(Mutex<usize>, Condvar)>,
        started: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl GatedFingerprinter {
        fn new() -> Self {
            Self {
                permits: Arc::new((Mutex::new(0), Condvar::new())),
                started: Arc::new(AtomicUsize::new(0)),
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn grant(&self, n: usize) {
            let (lock, cvar) = &*self.permits;
            *lock.lock().unwrap() += n;
            cvar.notify_all();
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn running(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl Fingerprinter for GatedFingerprinter {
        fn fingerprint(
            &self,
            _data: &[u8],
            _cancel: &CancellationToken,
        ) -> Result<Fingerprint, FingerprintError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let inside = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(inside, Ordering::SeqCst);

            let (lock, cvar) = &*self.permits;
            let mut permits = lock.lock().unwrap();
            while *permits == 0 {
                permits = cvar.wait(permits).unwrap();
            }
            *permits -= 1;
            drop(permits);

            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Fingerprint {
                content_hash: "0".repeat(64),
                signature: vec![0; 8],
            })
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_in_flight_capped_at_limit() {
        let mut jobs_out = FanOutSender::bind("127.0.0.1:0").await.unwrap();
        let job_addr = jobs_out.local_addr().to_string();
        let mut ingress = FanInReceiver::bind("127.0.0.1:0", 16).await.unwrap();
        let ingress_addr = ingress.local_addr().to_string();

        let gate = GatedFingerprinter::new();
        let dispatch = DispatchLoop::new(gate.clone(), 4, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let pull = PullQueue::connect(&job_addr).await.unwrap();
        let push = PushQueue::connect(&ingress_addr).await.unwrap();
        let handle = tokio::spawn(dispatch.run(pull, push, cancel.clone()));

        for i in 0..5u32 {
            let job = CollectedImage {
                service_name: "booru".to_string(),
                source: Url::parse(&format!("https://booru.example/posts/{i}")).unwrap(),
                image: Url::parse(&format!("https://booru.example/img/{i}.png")).unwrap(),
                data: vec![i as u8],
            };
            jobs_out.send(&job.to_frames()).await.unwrap();
        }

        // Four jobs enter; the fifth stays queued behind the full table.
        wait_until(|| gate.running() == 4).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gate.started(), 4);
        assert_eq!(gate.peak(), 4);

        // One completion frees a slot and only then does the fifth start.
        gate.grant(1);
        wait_until(|| gate.started() == 5).await;
        gate.grant(4);

        let mut processed = 0;
        while processed < 5 {
            let frames = ingress.recv().await.unwrap();
            if let Ok(report) = StatusReport::from_frames(&frames) {
                assert_eq!(report.status, ImageStatus::Processed);
                processed += 1;
            }
        }
        assert_eq!(gate.peak(), 4);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
