//! Logging setup shared by the doppel binaries.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber: `info` by default,
/// overridable through `RUST_LOG`. `log` records from the persistence
/// and transport layers are bridged into the same subscriber.
pub fn init() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .try_init();
}
