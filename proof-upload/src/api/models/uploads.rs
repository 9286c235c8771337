use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::StoredFile;

pub const UPLOAD_SUCCESS_MESSAGE: &str = "Proof uploaded successfully!";

/// Multipart form accepted by the upload endpoint. Documentation only: the handler reads
/// the form as a stream.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProofUploadForm {
    /// The payment screenshot. Must be an image.
    #[schema(value_type = String, format = Binary)]
    pub screenshot: Vec<u8>,
    pub name: Option<String>,
    pub order_number: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// Returned when the proof was stored and shared
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// Link anyone can open to view the stored file
    pub file_url: String,
    /// Name the file was stored under
    pub file_name: String,
}

impl From<StoredFile> for UploadResponse {
    fn from(file: StoredFile) -> Self {
        Self {
            success: true,
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
            file_url: file.public_url(),
            file_name: file.name,
        }
    }
}

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
