//! Google Drive storage backend
//!
//! Talks to the Drive v3 REST API directly:
//!
//! - create: `POST /upload/drive/v3/files?uploadType=multipart` with a `multipart/related` body
//!   (JSON metadata part followed by the media part)
//! - share: `POST /drive/v3/files/{id}/permissions` with `{"role":"reader","type":"anyone"}`
//! - delete: `DELETE /drive/v3/files/{id}`
//!
//! All calls pass `supportsAllDrives=true` so the destination folder may live in a shared drive.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::credentials::{AccessTokenSource, ServiceAccountKey, ServiceAccountTokenSource};
use super::{NewFile, ProofStorage, Result, StorageError, StoredFile, build_http_client};
use crate::config::GoogleDriveConfig;

/// Fields requested from Drive when a file is created
pub const CREATE_FIELDS: &str = "id,name,webViewLink,webContentLink";

/// Metadata part of a multipart upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileMetadata<'a> {
    name: &'a str,
    description: &'a str,
    mime_type: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct PermissionRequest {
    role: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Google's JSON error envelope: `{"error": {"code": 403, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
}

pub struct GoogleDriveStorage {
    http: reqwest::Client,
    tokens: AccessTokenSource,
    folder_id: String,
    api_base_url: Url,
    upload_base_url: Url,
}

impl GoogleDriveStorage {
    pub fn new(http: reqwest::Client, tokens: AccessTokenSource, folder_id: String, api_base_url: Url, upload_base_url: Url) -> Self {
        Self {
            http,
            tokens,
            folder_id,
            api_base_url,
            upload_base_url,
        }
    }

    pub fn from_config(config: &GoogleDriveConfig) -> Result<Self> {
        let http = build_http_client(config.request_timeout)?;

        let tokens = match (&config.access_token, &config.service_account_key_path) {
            (Some(token), _) => AccessTokenSource::Static(token.clone()),
            (None, Some(path)) => {
                let key = ServiceAccountKey::from_file(path)?;
                tracing::info!(client_email = %key.client_email, "Using service account credentials for Google Drive");
                AccessTokenSource::ServiceAccount(ServiceAccountTokenSource::new(key, &config.scopes, http.clone())?)
            }
            (None, None) => return Err(StorageError::Config("no Google Drive credentials configured".to_string())),
        };

        Ok(Self::new(
            http,
            tokens,
            config.folder_id.clone(),
            config.api_base_url.clone(),
            config.upload_base_url.clone(),
        ))
    }

    fn url(base: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config(format!("{base} cannot be used as a base URL")))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("supportsAllDrives", "true");
        Ok(url)
    }

    fn upload_url(&self) -> Result<Url> {
        let mut url = Self::url(&self.upload_base_url, &["upload", "drive", "v3", "files"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", CREATE_FIELDS);
        Ok(url)
    }

    fn file_url(&self, file_id: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["drive", "v3", "files", file_id];
        segments.extend_from_slice(rest);
        Self::url(&self.api_base_url, &segments)
    }

    /// Turn a non-2xx response into a [`StorageError::Api`] carrying Google's message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorBody>(&text)
            .ok()
            .map(|body| body.error.message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    format!("Storage provider returned HTTP {status}")
                } else {
                    text
                }
            });

        Err(StorageError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Encode a `multipart/related` body: metadata JSON, then the media bytes.
fn multipart_related(boundary: &str, metadata: &[u8], mime_type: &str, content: &Bytes) -> Bytes {
    let mut body = BytesMut::with_capacity(content.len() + metadata.len() + 256);
    body.put_slice(format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes());
    body.put_slice(metadata);
    body.put_slice(format!("\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.put_slice(content);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body.freeze()
}

#[async_trait]
impl ProofStorage for GoogleDriveStorage {
    #[tracing::instrument(skip_all, fields(name = %file.name, bytes = file.content.len()))]
    async fn create_file(&self, file: NewFile) -> Result<StoredFile> {
        let metadata = DriveFileMetadata {
            name: &file.name,
            description: &file.description,
            mime_type: &file.mime_type,
            parents: [self.folder_id.as_str()],
        };
        let metadata = serde_json::to_vec(&metadata).map_err(|e| StorageError::Config(format!("encode file metadata: {e}")))?;

        let boundary = format!("proof_upload_{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &file.mime_type, &file.content);

        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(self.upload_url()?)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let stored: StoredFile = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("file create: {e}")))?;

        tracing::debug!(file_id = %stored.id, "Drive file created");
        Ok(stored)
    }

    #[tracing::instrument(skip(self))]
    async fn grant_public_read(&self, file_id: &str) -> Result<()> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(self.file_url(file_id, &["permissions"])?)
            .bearer_auth(token)
            .json(&PermissionRequest {
                role: "reader",
                kind: "anyone",
            })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let token = self.tokens.token().await?;
        let response = self.http.delete(self.file_url(file_id, &[])?).bearer_auth(token).send().await?;

        Self::check(response).await?;
        Ok(())
    }
}
