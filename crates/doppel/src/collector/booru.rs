//! Booru collector: pages a JSON post API and downloads the files.
//!
//! Pagination uses the `page=a{id}` cursor form (posts with id greater
//! than the cursor, ascending), so the resume point is simply the
//! highest post id seen. Authentication is a session ticket; a 401
//! triggers one re-login and replay before the retry policy sees the
//! failure.

use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::messages::CollectedImage;

use super::policy::{with_reauth, with_retry, RetryPolicy, Throttle};
use super::{CollectedBatch, Collector, CollectorError};

/// Header carrying the session ticket on API requests.
const SESSION_TICKET_HEADER: &str = "x-session-ticket";

/// Default connect timeout for booru requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for booru requests (60 seconds, downloads
/// included).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum length for error response bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LENGTH])
    } else {
        body.to_string()
    }
}

/// Login credentials for ticket-based auth.
pub struct BooruAuth {
    pub login: String,
    pub api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: u64,
    file: PostFile,
}

#[derive(Debug, Deserialize)]
struct PostFile {
    /// Absent for posts hidden from the current user.
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    ticket: String,
}

/// Collector for a booru-style post API.
pub struct BooruCollector {
    service_name: String,
    client: Client,
    base_url: Url,
    page_size: u32,
    auth: Option<BooruAuth>,
    ticket: Mutex<Option<String>>,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl BooruCollector {
    pub fn new(
        service_name: String,
        base_url: Url,
        page_size: u32,
        rate_limit_per_sec: u32,
        auth: Option<BooruAuth>,
    ) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            service_name,
            client,
            base_url,
            page_size: page_size.max(1),
            auth,
            ticket: Mutex::new(None),
            throttle: Throttle::new(rate_limit_per_sec),
            retry: RetryPolicy::default(),
        })
    }

    fn posts_url(&self, after: Option<u64>) -> Result<Url, CollectorError> {
        let mut url = self
            .base_url
            .join("posts.json")
            .map_err(|e| CollectorError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = after {
                query.append_pair("page", &format!("a{}", id));
            }
            query.append_pair("limit", &self.page_size.to_string());
        }
        Ok(url)
    }

    fn post_page_url(&self, id: u64) -> Result<Url, CollectorError> {
        self.base_url
            .join(&format!("posts/{}", id))
            .map_err(|e| CollectorError::InvalidUrl(e.to_string()))
    }

    fn current_ticket(&self) -> Option<String> {
        match self.ticket.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_ticket(&self, ticket: String) {
        let mut guard = match self.ticket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(ticket);
    }

    fn request_for(&self, url: &Url) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url.clone());
        if let Some(ticket) = self.current_ticket() {
            request = request.header(SESSION_TICKET_HEADER, ticket);
        }
        request
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, CollectorError> {
        let response = self.request_for(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => Err(CollectorError::AuthExpired),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CollectorError::BadResponse {
                    status,
                    body: truncate_body(&body),
                })
            }
        }
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, CollectorError> {
        let response = self.request_for(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::UNAUTHORIZED => Err(CollectorError::AuthExpired),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CollectorError::BadResponse {
                    status,
                    body: truncate_body(&body),
                })
            }
        }
    }

    /// Logs in with the configured credentials and stores the new
    /// session ticket. Without credentials the auth failure stands.
    async fn login(&self) -> Result<(), CollectorError> {
        let Some(auth) = &self.auth else {
            return Err(CollectorError::AuthExpired);
        };

        let url = self
            .base_url
            .join("session.json")
            .map_err(|e| CollectorError::InvalidUrl(e.to_string()))?;
        info!("Re-authenticating against {}", url);

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "login": auth.login,
                "api_key": auth.api_key.expose_secret(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::LoginFailed {
                status,
                body: truncate_body(&body),
            });
        }

        let session: SessionResponse = response.json().await?;
        self.store_ticket(session.ticket);
        Ok(())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, CollectorError> {
        with_retry(&self.retry, || async {
            self.throttle.acquire().await;
            with_reauth(
                || self.get_json::<T>(url),
                || self.login(),
                |e| matches!(e, CollectorError::AuthExpired),
            )
            .await
        })
        .await
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, CollectorError> {
        with_retry(&self.retry, || async {
            self.throttle.acquire().await;
            with_reauth(
                || self.get_bytes(url),
                || self.login(),
                |e| matches!(e, CollectorError::AuthExpired),
            )
            .await
        })
        .await
    }
}

fn parse_cursor(resume: &str) -> Result<u64, CollectorError> {
    resume
        .parse::<u64>()
        .map_err(|_| CollectorError::InvalidCursor(resume.to_string()))
}

#[async_trait::async_trait]
impl Collector for BooruCollector {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn collect(&mut self, resume: Option<String>) -> Result<CollectedBatch, CollectorError> {
        let after = match resume.as_deref() {
            Some(cursor) => Some(parse_cursor(cursor)?),
            None => None,
        };

        let url = self.posts_url(after)?;
        debug!("Fetching posts page: {}", url);
        let page: PostsResponse = self.fetch_json(&url).await?;

        let mut images = Vec::new();
        let mut highest = after.unwrap_or(0);

        for post in &page.posts {
            highest = highest.max(post.id);

            let Some(file_url) = &post.file.url else {
                debug!("Post {} has no visible file, skipping", post.id);
                continue;
            };
            let image_url = Url::parse(file_url)
                .map_err(|e| CollectorError::InvalidUrl(format!("post {}: {}", post.id, e)))?;

            let data = self.fetch_bytes(&image_url).await?;
            images.push(CollectedImage {
                service_name: self.service_name.clone(),
                source: self.post_page_url(post.id)?,
                image: image_url,
                data,
            });
        }

        let end_of_stream = (page.posts.len() as u32) < self.page_size;
        let resume_point = if page.posts.is_empty() {
            None
        } else {
            Some(highest.to_string())
        };

        Ok(CollectedBatch {
            images,
            resume_point,
            end_of_stream,
        })
    }
}
