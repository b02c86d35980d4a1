//! Resiliency policies for outbound HTTP.
//!
//! Collectors wrap every remote call in an explicit composition of
//! retry (decorrelated jitter backoff) and throttle (fixed one-second
//! admission window), plus a one-shot re-auth replay for expired
//! sessions. The composition is spelled out at the call site:
//! `with_retry(policy, || { throttle.acquire(); call() })`.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Fixed admission window for throttling.
const WINDOW: Duration = Duration::from_secs(1);

/// Retry schedule: decorrelated jitter with a hard attempt cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Five attempts, half-second seed, thirty-second ceiling.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Draws the next backoff delay: uniform between the base delay
    /// and three times the previous one, clamped to the ceiling.
    fn next_delay(&self, prev: Duration) -> Duration {
        let low = self.base_delay;
        let high = (prev * 3).clamp(low, self.max_delay);
        low + (high - low).mul_f64(random_unit())
    }
}

/// Uniform draw from [0, 1) backed by the OS generator.
fn random_unit() -> f64 {
    match getrandom::u64() {
        Ok(v) => (v >> 11) as f64 / (1u64 << 53) as f64,
        Err(_) => 0.5,
    }
}

/// Runs a fallible async call under the retry policy, sleeping the
/// jittered delay between attempts. The last error is returned once
/// the attempt cap is reached.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                delay = policy.next_delay(delay);
                debug!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Runs a call that can fail with an expired credential. On the first
/// auth failure the refresh future runs and the call is replayed once;
/// a second auth failure is returned as-is.
pub async fn with_reauth<T, E, C, CFut, R, RFut, P>(
    mut call: C,
    refresh: R,
    is_auth_error: P,
) -> Result<T, E>
where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<T, E>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<(), E>>,
    P: Fn(&E) -> bool,
{
    match call().await {
        Err(e) if is_auth_error(&e) => {
            debug!("Credential rejected, refreshing and replaying once");
            refresh().await?;
            call().await
        }
        other => other,
    }
}

struct Window {
    started_at: Instant,
    admitted: u32,
}

/// Admission throttle: at most `rate` acquisitions per one-second
/// window. Callers past the limit wait for the next window to open.
pub struct Throttle {
    rate: u32,
    window: Mutex<Window>,
}

impl Throttle {
    pub fn new(rate_per_sec: u32) -> Self {
        Self {
            rate: rate_per_sec.max(1),
            window: Mutex::new(Window {
                started_at: Instant::now(),
                admitted: 0,
            }),
        }
    }

    /// Waits until the current window has room, then takes a slot.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(next_window) => tokio::time::sleep_until(next_window).await,
            }
        }
    }

    fn try_acquire(&self) -> Result<(), Instant> {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        if now.duration_since(window.started_at) >= WINDOW {
            window.started_at = now;
            window.admitted = 0;
        }

        if window.admitted < self.rate {
            window.admitted += 1;
            Ok(())
        } else {
            Err(window.started_at + WINDOW)
        }
    }
}
