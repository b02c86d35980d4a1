//! The fingerprinting pipeline: decode, content hash, perceptual
//! signature.
//!
//! `fingerprint` is a pure function over the input bytes. It holds no
//! shared state, so arbitrarily many invocations may run concurrently.
//! Cancellation is observed between stages; a stage already running is
//! never interrupted mid-computation.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod generator;

pub use generator::{ImageSignature, SignatureGenerator};

/// Errors from the fingerprinting pipeline.
#[derive(Error, Debug, Clone)]
pub enum FingerprintError {
    /// The input bytes did not decode as an image.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Signature computation failed.
    #[error("Failed to compute signature: {0}")]
    Compute(String),

    /// A packed signature could not be decoded.
    #[error("Invalid signature encoding: {0}")]
    Encoding(String),

    /// Cancellation was observed between stages.
    #[error("Fingerprinting cancelled")]
    Cancelled,
}

/// The result of fingerprinting one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-256 of the raw input bytes, lower-case hex.
    pub content_hash: String,
    /// Packed perceptual signature (`ImageSignature::to_bytes`).
    pub signature: Vec<u8>,
}

/// Computes the SHA-256 content hash of raw bytes as lower-case hex.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Runs the full pipeline: decode, hash, signature.
///
/// Any error aborts the whole job; partial results are never returned.
pub fn fingerprint(
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<Fingerprint, FingerprintError> {
    let _span = tracing::info_span!("signature.fingerprint").entered();

    if cancel.is_cancelled() {
        return Err(FingerprintError::Cancelled);
    }
    let img = image::load_from_memory(data).map_err(|e| FingerprintError::Decode(e.to_string()))?;

    if cancel.is_cancelled() {
        return Err(FingerprintError::Cancelled);
    }
    let content_hash = content_hash(data);

    if cancel.is_cancelled() {
        return Err(FingerprintError::Cancelled);
    }
    let signature = SignatureGenerator::default().generate(&img)?;

    Ok(Fingerprint {
        content_hash,
        signature: signature.to_bytes(),
    })
}
