use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::BytesMut;
use metrics::counter;

use crate::{
    AppState,
    api::models::uploads::{ErrorResponse, ProofUploadForm, UploadResponse},
    config::UploadConfig,
    errors::{Error, Result},
    proof::{ProofImage, ProofSubmission},
};

/// Name of the multipart field carrying the image
pub const FILE_FIELD: &str = "screenshot";

#[utoipa::path(
    post,
    path = "/proof-upload",
    tag = "uploads",
    summary = "Upload proof of payment",
    description = "Stores a payment screenshot together with the order details and returns a public link to it. \
                   The file must be an image no larger than the configured limit (10 MiB by default).",
    request_body(
        content = ProofUploadForm,
        content_type = "multipart/form-data",
        description = "Screenshot plus order metadata"
    ),
    responses(
        (status = 200, description = "Proof stored and shared", body = UploadResponse),
        (status = 400, description = "No file, a non-image file, or a file over the size limit", body = ErrorResponse),
        (status = 500, description = "The form could not be read or the storage provider failed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_proof(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    // A request that is not multipart at all carries no file
    let multipart = multipart.map_err(|e| {
        tracing::debug!(error = %e, "Request is not a multipart form");
        Error::MissingFile
    })?;

    let submission = match read_submission(multipart, &state.config.upload).await {
        Ok(submission) => submission,
        Err(e) => {
            let outcome = if e.status_code() == StatusCode::BAD_REQUEST { "rejected" } else { "malformed" };
            counter!("proof_upload_uploads_total", "outcome" => outcome).increment(1);
            return Err(e);
        }
    };

    tracing::info!(
        order_number = %submission.order_number,
        file_name = %submission.image.file_name,
        mime_type = %submission.image.mime_type,
        size = submission.image.content.len(),
        "Processing upload"
    );

    let stored = state.uploader.upload(submission).await?;

    Ok(Json(UploadResponse::from(stored)))
}

/// Text fields of the form; any that are missing stay empty.
#[derive(Default)]
struct TextFields {
    name: String,
    order_number: String,
    mobile: String,
    email: String,
    notes: String,
}

/// Read the whole form, enforcing the upload policy on the file part as it streams in.
async fn read_submission(mut multipart: Multipart, policy: &UploadConfig) -> Result<ProofSubmission> {
    let mut fields = TextFields::default();
    let mut image: Option<ProofImage> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, policy))? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            FILE_FIELD => {
                // Browsers send an unnamed, empty part for a file input left blank
                let file_name = match field.file_name() {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => continue,
                };

                if image.is_some() {
                    return Err(Error::MalformedForm {
                        message: format!("Unexpected field: only one \"{FILE_FIELD}\" file is accepted"),
                    });
                }

                let mime_type = field.content_type().map(str::to_string);
                let mime_type = match mime_type {
                    Some(mime) if policy.is_allowed_mime(&mime) => mime,
                    other => return Err(Error::UnsupportedMediaType { mime: other }),
                };

                let mut content = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, policy))? {
                    if (content.len() + chunk.len()) as u64 > policy.max_file_size {
                        tracing::warn!(
                            file_name = %file_name,
                            max_file_size = policy.max_file_size,
                            "File size limit exceeded, aborting upload"
                        );
                        return Err(Error::FileTooLarge {
                            limit: policy.max_file_size,
                        });
                    }
                    content.extend_from_slice(&chunk);
                }

                image = Some(ProofImage {
                    file_name,
                    mime_type,
                    content: content.freeze(),
                });
            }
            "name" | "orderNumber" | "mobile" | "email" | "notes" => {
                let value = field.text().await.map_err(|e| multipart_error(e, policy))?;
                let slot = match field_name.as_str() {
                    "name" => &mut fields.name,
                    "orderNumber" => &mut fields.order_number,
                    "mobile" => &mut fields.mobile,
                    "email" => &mut fields.email,
                    _ => &mut fields.notes,
                };
                *slot = value;
            }
            _ => {
                tracing::debug!(field = %field_name, "Ignoring unknown form field");
            }
        }
    }

    let image = image.ok_or(Error::MissingFile)?;

    Ok(ProofSubmission {
        name: fields.name,
        order_number: fields.order_number,
        mobile: fields.mobile,
        email: fields.email,
        notes: Some(fields.notes).filter(|notes| !notes.is_empty()),
        image,
    })
}

/// The body limit surfaces as a 413 multipart error; report it like any other oversize file.
/// Anything else means the body itself is broken.
fn multipart_error(e: MultipartError, policy: &UploadConfig) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::FileTooLarge {
            limit: policy.max_file_size,
        }
    } else {
        Error::MalformedForm {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}
