use crate::api::models::uploads::ErrorResponse;
use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Fallback message when a failure carries no text of its own
pub const GENERIC_UPLOAD_FAILURE: &str = "Failed to upload file";

#[derive(ThisError, Debug)]
pub enum Error {
    /// The form carried no usable file
    #[error("Please select a file to upload")]
    MissingFile,

    /// The file's declared content type is not an accepted image type
    #[error("Only image files are allowed!")]
    UnsupportedMediaType { mime: Option<String> },

    /// The file is larger than the configured limit
    #[error("File too large: the maximum allowed size is {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// The multipart body could not be read (truncated, malformed, or an unexpected extra file)
    #[error("{message}")]
    MalformedForm { message: String },

    /// The storage provider failed; the file may or may not exist
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingFile | Error::UnsupportedMediaType { .. } | Error::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            Error::MalformedForm { .. } | Error::Storage(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message placed in the `error` field of the response body.
    ///
    /// Storage failures pass the provider's message through, so operators can tell quota
    /// problems from permission problems without reading the server logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Internal { .. } => GENERIC_UPLOAD_FAILURE.to_string(),
            _ => {
                let message = self.to_string();
                if message.trim().is_empty() {
                    GENERIC_UPLOAD_FAILURE.to_string()
                } else {
                    message
                }
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::MalformedForm { .. } | Error::Storage(_) | Error::Internal { .. } => {
                tracing::error!("Upload error: {:#}", self);
            }
            Error::MissingFile | Error::UnsupportedMediaType { .. } | Error::FileTooLarge { .. } => {
                tracing::warn!("Rejected upload: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorResponse::new(self.user_message());

        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
