pub mod broker;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod index;
pub mod logging;
pub mod messages;
pub mod secrets;
pub mod signature;
pub mod transport;
pub mod worker;

pub use config::{default_config_path, load_config, Config};
pub use error::{ConfigError, DoppelError, Result};
pub use messages::{CollectedImage, FingerprintedImage, ImageStatus, Message, StatusReport};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use signature::{content_hash, fingerprint, Fingerprint};
