//! Framed TCP queue transport.
//!
//! Messages travel as multipart frames: one `u8` frame count followed by
//! length-prefixed frames. Channels are unidirectional (push or pull) and
//! carry at-least-once semantics: delivery is ordered per connection, and
//! there is no deduplication, so consumers are idempotent. A dropped
//! connection is not retried here; restart is the recovery mechanism.

use thiserror::Error;

pub mod frame;
pub mod queue;
pub mod state;

pub use queue::{FanInReceiver, FanOutSender, PullQueue, PushQueue, QueueListener};
pub use state::StateClient;

/// Upper bound on frames per message; anything above is a protocol error.
pub const MAX_FRAMES: u8 = 16;

/// Upper bound on a single frame's length (64 MiB).
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Errors from the queue transport. These are fatal to the affected
/// process; per-job failures never surface here.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("Connection closed")]
    Closed,
}
