//! Search index client.
//!
//! Fingerprinted images are published as JSON documents to an HTTP
//! search index. The document id is derived from the item identity, so
//! a replayed delivery overwrites its own document instead of creating
//! a duplicate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Maximum length for error response bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Default connect timeout for index requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for index requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from search index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// The request did not complete (connect, timeout, body).
    #[error("Index request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The index answered with a non-success status.
    #[error("Index rejected document ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Document published to the search index for one fingerprinted image.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedImage {
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub link: String,
    /// Packed signature bytes, base64-encoded.
    pub signature: String,
    /// Word subsequences for candidate lookup.
    pub words: Vec<u64>,
}

/// Destination for fingerprinted image documents.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, doc: &IndexedImage) -> Result<(), IndexError>;
}

/// Deterministic document id for a (source, link) identity.
pub fn document_id(source: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(link.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LENGTH])
    } else {
        body.to_string()
    }
}

/// HTTP search index client (Elasticsearch-compatible document PUT).
pub struct HttpSearchIndex {
    client: Client,
    base_url: Url,
    index_name: String,
    credentials: Option<(String, SecretString)>,
}

impl HttpSearchIndex {
    /// Creates a client for the given index endpoint. Credentials, when
    /// present, are sent as HTTP basic auth on every request.
    pub fn new(
        base_url: Url,
        index_name: String,
        credentials: Option<(String, SecretString)>,
    ) -> Result<Self, IndexError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IndexError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            index_name,
            credentials,
        })
    }

    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.index_name,
            id
        )
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn index(&self, doc: &IndexedImage) -> Result<(), IndexError> {
        let id = document_id(&doc.source, &doc.link);
        let url = self.document_url(&id);

        let mut request = self.client.put(&url).json(doc);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password.expose_secret()));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status,
                body: truncate_body(&body),
            });
        }

        log::debug!("Indexed document {} into '{}'", id, self.index_name);
        Ok(())
    }
}
