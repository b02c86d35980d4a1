use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoppelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] crate::signature::FingerprintError),

    #[error("Message parse error: {0}")]
    Parse(#[from] crate::messages::ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::worker::DispatchError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Index error: {0}")]
    Index(#[from] crate::index::IndexError),

    #[error("Collector error: {0}")]
    Collector(#[from] crate::collector::CollectorError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid endpoint '{field}': {reason}")]
    InvalidEndpoint { field: String, reason: String },

    #[error("Invalid URL '{field}': {reason}")]
    InvalidUrl { field: String, reason: String },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

pub type Result<T> = std::result::Result<T, DoppelError>;
