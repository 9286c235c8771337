//! Storage provider abstraction layer
//!
//! This module defines the [`ProofStorage`] trait, which abstracts the two operations an
//! upload needs from a cloud file store: create a file, then make it publicly readable.
//! A delete operation exists so a caller can undo a creation whose permission grant failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};

pub mod credentials;
pub mod google_drive;
pub mod in_memory;

/// Create a storage backend from configuration
///
/// This is the single point where we convert config into storage instances.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ProofStorage>> {
    match config.backend {
        StorageBackend::GoogleDrive => Ok(Arc::new(google_drive::GoogleDriveStorage::from_config(&config.google_drive)?)),
        StorageBackend::InMemory => Ok(Arc::new(in_memory::InMemoryStorage::new())),
    }
}

/// Build the HTTP client used for provider calls.
///
/// reqwest is compiled without a bundled rustls provider; the aws-lc-rs provider is installed
/// here if the binary has not already done so.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StorageError::Config(format!("cannot build HTTP client: {e}")))
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to the storage provider
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The provider answered with an error status
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The request never got an answer (DNS, TLS, timeout, connection reset)
    #[error("Storage provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// No access token could be obtained
    #[error("Storage authentication failed: {0}")]
    Auth(String),

    /// The provider answered 2xx with a body we could not use
    #[error("Unexpected storage provider response: {0}")]
    InvalidResponse(String),

    /// Local setup problem (unreadable key file, bad base URL)
    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// A file to be created in the provider.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Destination file name
    pub name: String,
    /// Free-text description stored alongside the file
    pub description: String,
    /// Declared content type of `content`
    pub mime_type: String,
    pub content: Bytes,
}

/// What the provider reports back after creating a file.
///
/// Mirrors the Drive fields requested with `fields=id,name,webViewLink,webContentLink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
}

impl StoredFile {
    /// Link handed back to the client. Never empty: falls back to the content link and
    /// then to the canonical Drive viewer URL for the file id.
    pub fn public_url(&self) -> String {
        [&self.web_view_link, &self.web_content_link]
            .into_iter()
            .flatten()
            .find(|link| !link.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", self.id))
    }
}

/// Abstract storage interface
///
/// Implementors store proof files for a single destination (e.g. one Drive folder).
#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Upload `file` and return the provider's identifiers and links for it.
    async fn create_file(&self, file: NewFile) -> Result<StoredFile>;

    /// Make the file readable by anyone holding the link (role=reader, type=anyone).
    async fn grant_public_read(&self, file_id: &str) -> Result<()>;

    /// Delete a previously created file.
    async fn delete_file(&self, file_id: &str) -> Result<()>;
}
