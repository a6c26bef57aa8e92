//! Content Fetcher - Confluence Page Source
//!
//! [`PageSource`] is the port the pipeline reads pages through.
//! [`ConfluenceSource`] implements it against the Confluence REST API:
//!
//! ```text
//! GET {base}/rest/api/content/{page_id}?expand=body.storage,history
//! Cookie: AWSELBAuthSessionCookie-0=...; seraph.confluence=...
//! ```
//!
//! The title comes from `title`, the markup from `body.storage.value` and the
//! author from `history.createdBy` (username, then display name).
//!
//! Embedded attachments are downloaded with the same cookies from
//! `{base}/download/attachments/{page_id}/{filename}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::COOKIE};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConfluenceConfig;
use crate::document::Document;

/// Author recorded when the page history carries no creator.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Source of pages for the pipeline.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches one page by ID.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on network failure, a non-2xx response or a
    /// response missing the title or body.
    async fn fetch(&self, page_id: &str) -> Result<Document, FetchError>;

    /// Downloads one attachment of a page.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on network failure or a non-2xx response.
    async fn attachment(&self, page_id: &str, filename: &str) -> Result<Vec<u8>, FetchError>;
}

/// Errors raised while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for page {page_id} failed: {source}")]
    Request {
        page_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Confluence returned {status} for page {page_id}{}", status_hint(.status))]
    Status { page_id: String, status: StatusCode },

    #[error("response for page {page_id} is not valid JSON: {source}")]
    Decode {
        page_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Confluence returned {status} for attachment {filename} of page {page_id}")]
    AttachmentStatus {
        page_id: String,
        filename: String,
        status: StatusCode,
    },

    #[error("response for page {page_id} has no {field}")]
    MissingField {
        page_id: String,
        field: &'static str,
    },

    #[error("cannot build a content URL for page {page_id} from {base_url}")]
    InvalidUrl { page_id: String, base_url: Url },
}

impl FetchError {
    /// HTTP status of the failed response, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } | Self::AttachmentStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn status_hint(status: &StatusCode) -> &'static str {
    match *status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            " (authentication failed; refresh AWSELB_COOKIE and JSESSIONID)"
        }
        StatusCode::NOT_FOUND => " (page not found)",
        _ => "",
    }
}

/// Subset of the content API response that the pipeline reads.
#[derive(Debug, Deserialize)]
struct ContentResponse {
    id: Option<String>,
    title: Option<String>,
    body: Option<ContentBody>,
    history: Option<ContentHistory>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    storage: Option<StorageValue>,
}

#[derive(Debug, Deserialize)]
struct StorageValue {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentHistory {
    #[serde(rename = "createdBy")]
    created_by: Option<ContentUser>,
}

#[derive(Debug, Deserialize)]
struct ContentUser {
    username: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl ContentResponse {
    fn into_document(self, page_id: &str) -> Result<Document, FetchError> {
        let missing = |field| FetchError::MissingField {
            page_id: page_id.to_string(),
            field,
        };

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing("title"))?;
        let raw_markup = self
            .body
            .and_then(|b| b.storage)
            .and_then(|s| s.value)
            .ok_or_else(|| missing("body.storage.value"))?;
        let author_name = self
            .history
            .and_then(|h| h.created_by)
            .and_then(|u| {
                u.username
                    .filter(|n| !n.is_empty())
                    .or(u.display_name.filter(|n| !n.is_empty()))
            })
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        Ok(Document {
            id: self.id.unwrap_or_else(|| page_id.to_string()),
            title,
            raw_markup,
            author_name,
        })
    }
}

/// Reads pages from the Confluence REST API using session cookies.
pub struct ConfluenceSource {
    client: Client,
    base_url: Url,
    cookie: String,
}

impl ConfluenceSource {
    /// Binds a client to one Confluence instance and session.
    pub fn new(client: Client, config: &ConfluenceConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            cookie: config.cookies.header_value(),
        }
    }

    /// Builds `{base}/rest/api/content/{page_id}` with the expand query.
    fn content_url(&self, page_id: &str) -> Result<Url, FetchError> {
        let mut url = self.url(page_id, &["rest", "api", "content", page_id])?;
        url.query_pairs_mut()
            .clear()
            .append_pair("expand", "body.storage,history");
        Ok(url)
    }

    /// Builds `{base}/download/attachments/{page_id}/{filename}`.
    fn attachment_url(&self, page_id: &str, filename: &str) -> Result<Url, FetchError> {
        self.url(page_id, &["download", "attachments", page_id, filename])
    }

    fn url(&self, page_id: &str, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl {
                page_id: page_id.to_string(),
                base_url: self.base_url.clone(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, page_id: &str, url: Url) -> Result<reqwest::Response, FetchError> {
        self.client
            .get(url)
            .header(COOKIE, &self.cookie)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                page_id: page_id.to_string(),
                source,
            })
    }
}

#[async_trait]
impl PageSource for ConfluenceSource {
    async fn fetch(&self, page_id: &str) -> Result<Document, FetchError> {
        let url = self.content_url(page_id)?;
        info!(page_id, "Fetching Confluence page");
        debug!(%url, "GET content");

        let response = self.get(page_id, url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                page_id: page_id.to_string(),
                status,
            });
        }

        let content: ContentResponse =
            response.json().await.map_err(|source| FetchError::Decode {
                page_id: page_id.to_string(),
                source,
            })?;

        let document = content.into_document(page_id)?;
        info!(
            page_id,
            title = %document.title,
            author = %document.author_name,
            bytes = document.raw_markup.len(),
            "Fetched page"
        );
        Ok(document)
    }

    async fn attachment(&self, page_id: &str, filename: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.attachment_url(page_id, filename)?;
        debug!(%url, "GET attachment");

        let response = self.get(page_id, url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::AttachmentStatus {
                page_id: page_id.to_string(),
                filename: filename.to_string(),
                status,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                page_id: page_id.to_string(),
                source,
            })?;
        info!(page_id, filename, bytes = bytes.len(), "Downloaded attachment");
        Ok(bytes.to_vec())
    }
}
