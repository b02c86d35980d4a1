pub mod dispatch;
pub mod inflight;

pub use dispatch::{run, DispatchLoop, Fingerprinter, SignatureFingerprinter};
pub use inflight::{Admission, InFlightTable, JobKey};

use thiserror::Error;

/// Errors that terminate the dispatch loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The job or ingress connection failed.
    #[error("Transport failure: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// An internal dispatch channel closed unexpectedly.
    #[error("Dispatch channel closed")]
    ChannelClosed,
}

/// Number of jobs allowed in flight: logical cores times the
/// configured multiplier.
pub fn dispatch_limit(multiplier: usize) -> usize {
    num_cpus::get().max(1) * multiplier.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_limit_scales_with_multiplier() {
        let cores = num_cpus::get().max(1);
        assert_eq!(dispatch_limit(1), cores);
        assert_eq!(dispatch_limit(2), cores * 2);
    }

    #[test]
    fn test_dispatch_limit_never_zero() {
        assert!(dispatch_limit(0) >= 1);
    }
}
