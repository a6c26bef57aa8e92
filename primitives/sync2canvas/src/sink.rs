//! Publisher - Slack Canvas Sink
//!
//! [`CanvasSink`] is the port converted pages are published through.
//! [`SlackCanvasSink`] creates a channel canvas with the Slack Web API:
//!
//! ```text
//! POST {api}/canvases.create
//! Authorization: Bearer xoxb-...
//! {"title": "...", "channel_id": "C...", "document_content": {"type": "markdown", "markdown": "..."}}
//! ```
//!
//! Attachments are hosted with the external upload flow:
//! `files.getUploadURLExternal`, a POST of the bytes to the returned
//! `upload_url`, then `files.completeUploadExternal` for the permalink.
//!
//! Slack reports API failures as HTTP 200 with `"ok": false`; the `error`
//! string is surfaced as-is. Nothing is retried.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SlackConfig;

/// A canvas to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    pub channel_id: String,
    pub title: String,
    pub markdown: String,
}

/// What the destination returned for a created canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasReceipt {
    pub canvas_id: String,
}

/// A file uploaded to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedFile {
    pub file_id: String,
    pub permalink: String,
}

/// Destination for converted pages.
#[async_trait]
pub trait CanvasSink: Send + Sync {
    /// Creates one canvas.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the request fails or the API rejects it.
    async fn publish(&self, canvas: &Canvas) -> Result<CanvasReceipt, PublishError>;

    /// Uploads a file so a canvas can link to it.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if any upload step fails or the API rejects it.
    async fn host_file(&self, filename: &str, contents: Vec<u8>) -> Result<HostedFile, PublishError>;
}

/// Errors raised while publishing a canvas or hosting a file.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("request to Slack failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Slack returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Slack API error: {error}")]
    Api { error: String },

    #[error("Slack response is not valid JSON: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("Slack response has no {0}")]
    MissingField(&'static str),

    #[error("cannot build a Slack API URL from {0}")]
    InvalidUrl(Url),

    #[error("Slack returned an invalid upload_url: {0}")]
    InvalidUploadUrl(String),
}

#[derive(Debug, Serialize)]
struct CreateCanvasRequest<'a> {
    title: &'a str,
    channel_id: &'a str,
    document_content: DocumentContent<'a>,
}

#[derive(Debug, Serialize)]
struct DocumentContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    markdown: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteUploadRequest<'a> {
    files: [UploadedTitle<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UploadedTitle<'a> {
    id: &'a str,
    title: &'a str,
}

/// Envelope shared by every Web API reply.
#[derive(Debug, Deserialize)]
struct Reply<T> {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> Reply<T> {
    fn into_body(self) -> Result<T, PublishError> {
        if self.ok {
            Ok(self.body)
        } else {
            Err(PublishError::Api {
                error: self.error.unwrap_or_else(|| "unknown_error".to_string()),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct CanvasCreated {
    canvas_id: Option<String>,
}

impl CanvasCreated {
    fn into_receipt(self) -> Result<CanvasReceipt, PublishError> {
        self.canvas_id
            .filter(|id| !id.is_empty())
            .map(|canvas_id| CanvasReceipt { canvas_id })
            .ok_or(PublishError::MissingField("canvas_id"))
    }
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_url: Option<String>,
    file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletedUpload {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
    permalink: Option<String>,
}

impl CompletedUpload {
    fn permalink(self, file_id: &str) -> Result<HostedFile, PublishError> {
        self.files
            .into_iter()
            .find(|file| file.id == file_id)
            .and_then(|file| file.permalink)
            .filter(|link| !link.is_empty())
            .map(|permalink| HostedFile {
                file_id: file_id.to_string(),
                permalink,
            })
            .ok_or(PublishError::MissingField("permalink"))
    }
}

/// Decodes a Web API reply, checking the HTTP status and `ok`.
async fn read_reply<T: DeserializeOwned>(response: Response) -> Result<T, PublishError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Status { status, body });
    }
    let reply: Reply<T> = response.json().await.map_err(PublishError::Decode)?;
    reply.into_body()
}

/// Creates canvases and hosts files through the Slack Web API.
pub struct SlackCanvasSink {
    client: Client,
    api_url: Url,
    token: SecretString,
}

impl SlackCanvasSink {
    pub fn new(client: Client, config: &SlackConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            token: config.bot_token.clone(),
        }
    }

    /// `{api}/{method}`
    fn method_url(&self, method: &str) -> Result<Url, PublishError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| PublishError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .push(method);
        Ok(url)
    }
}

#[async_trait]
impl CanvasSink for SlackCanvasSink {
    async fn publish(&self, canvas: &Canvas) -> Result<CanvasReceipt, PublishError> {
        let url = self.method_url("canvases.create")?;
        let request = CreateCanvasRequest {
            title: &canvas.title,
            channel_id: &canvas.channel_id,
            document_content: DocumentContent {
                kind: "markdown",
                markdown: &canvas.markdown,
            },
        };

        info!(channel_id = %canvas.channel_id, title = %canvas.title, "Creating Slack canvas");
        debug!(%url, markdown_bytes = canvas.markdown.len(), "POST canvases.create");

        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(PublishError::Request)?;

        let receipt = read_reply::<CanvasCreated>(response).await?.into_receipt()?;
        info!(canvas_id = %receipt.canvas_id, "Created Slack canvas");
        Ok(receipt)
    }

    async fn host_file(&self, filename: &str, contents: Vec<u8>) -> Result<HostedFile, PublishError> {
        let url = self.method_url("files.getUploadURLExternal")?;
        debug!(%url, filename, bytes = contents.len(), "POST files.getUploadURLExternal");
        let length = contents.len().to_string();
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .form(&[("filename", filename), ("length", length.as_str())])
            .send()
            .await
            .map_err(PublishError::Request)?;
        let target = read_reply::<UploadTarget>(response).await?;
        let upload_url = target
            .upload_url
            .ok_or(PublishError::MissingField("upload_url"))?;
        let file_id = target
            .file_id
            .filter(|id| !id.is_empty())
            .ok_or(PublishError::MissingField("file_id"))?;
        let upload_url =
            Url::parse(&upload_url).map_err(|_| PublishError::InvalidUploadUrl(upload_url))?;

        debug!(%file_id, "POST upload_url");
        let response = self
            .client
            .post(upload_url)
            .body(contents)
            .send()
            .await
            .map_err(PublishError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }

        let url = self.method_url("files.completeUploadExternal")?;
        debug!(%url, %file_id, "POST files.completeUploadExternal");
        let request = CompleteUploadRequest {
            files: [UploadedTitle {
                id: &file_id,
                title: filename,
            }],
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(PublishError::Request)?;

        let hosted = read_reply::<CompletedUpload>(response)
            .await?
            .permalink(&file_id)?;
        info!(filename, file_id = %hosted.file_id, "Hosted attachment on Slack");
        Ok(hosted)
    }
}
