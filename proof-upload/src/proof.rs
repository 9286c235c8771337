//! Payment proof submissions and the create-then-share upload sequence.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;

use crate::errors::Result;
use crate::storage::{NewFile, ProofStorage, StoredFile};

/// The image part of a submission, already checked against the upload policy.
#[derive(Debug, Clone)]
pub struct ProofImage {
    /// File name as sent by the client
    pub file_name: String,
    pub mime_type: String,
    pub content: Bytes,
}

/// One proof-of-payment form submission.
#[derive(Debug, Clone)]
pub struct ProofSubmission {
    pub name: String,
    pub order_number: String,
    pub mobile: String,
    pub email: String,
    /// Free-text notes; empty input is stored as `None`
    pub notes: Option<String>,
    pub image: ProofImage,
}

impl ProofSubmission {
    /// `Payment_Proof_<order>_<epoch millis><ext>`
    pub fn destination_file_name(&self, epoch_millis: i64) -> String {
        format!(
            "Payment_Proof_{}_{}{}",
            self.order_number,
            epoch_millis,
            extension(&self.image.file_name)
        )
    }

    pub fn description(&self) -> String {
        format!(
            "Proof of payment for Order #{}\nCustomer: {}\nEmail: {}\nMobile: {}\nNotes: {}",
            self.order_number,
            self.name,
            self.email,
            self.mobile,
            self.notes.as_deref().unwrap_or("None")
        )
    }

    fn into_new_file(self, epoch_millis: i64) -> NewFile {
        NewFile {
            name: self.destination_file_name(epoch_millis),
            description: self.description(),
            mime_type: self.image.mime_type,
            content: self.image.content,
        }
    }
}

/// Extension of `file_name` including the dot, or `""`.
///
/// Only the final path component counts, and a leading dot marks a hidden file rather than
/// an extension: `"photo.PNG"` → `".PNG"`, `"archive.tar.gz"` → `".gz"`, `".png"` → `""`,
/// `"scan."` → `"."`, `"..."` → `"."`.
pub fn extension(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);

    if base == ".." {
        return "";
    }

    match base.rfind('.') {
        None | Some(0) => "",
        Some(idx) => &base[idx..],
    }
}

/// Runs the two storage calls of an upload as one unit: create the file, then make it public.
///
/// The grant needs the id returned by the create, so the calls are strictly sequential.
/// A failed grant leaves the created file in place unless `rollback_on_permission_failure`
/// is set, in which case a best-effort delete is attempted before the error is returned.
#[derive(Clone)]
pub struct ProofUploader {
    storage: Arc<dyn ProofStorage>,
    rollback_on_permission_failure: bool,
}

impl ProofUploader {
    pub fn new(storage: Arc<dyn ProofStorage>, rollback_on_permission_failure: bool) -> Self {
        Self {
            storage,
            rollback_on_permission_failure,
        }
    }

    #[tracing::instrument(skip_all, fields(order_number = %submission.order_number))]
    pub async fn upload(&self, submission: ProofSubmission) -> Result<StoredFile> {
        let new_file = submission.into_new_file(Utc::now().timestamp_millis());

        let stored = match self.storage.create_file(new_file).await {
            Ok(stored) => stored,
            Err(e) => {
                counter!("proof_upload_uploads_total", "outcome" => "create_failed").increment(1);
                return Err(e.into());
            }
        };

        tracing::info!(file_id = %stored.id, file_name = %stored.name, "File uploaded");

        if let Err(e) = self.storage.grant_public_read(&stored.id).await {
            counter!("proof_upload_uploads_total", "outcome" => "permission_failed").increment(1);

            if self.rollback_on_permission_failure {
                match self.storage.delete_file(&stored.id).await {
                    Ok(()) => tracing::info!(file_id = %stored.id, "Deleted file after failed permission grant"),
                    Err(delete_err) => tracing::warn!(
                        file_id = %stored.id,
                        error = %delete_err,
                        "Could not delete file after failed permission grant, file is orphaned"
                    ),
                }
            } else {
                tracing::warn!(file_id = %stored.id, "Permission grant failed, file remains private in storage");
            }

            return Err(e.into());
        }

        counter!("proof_upload_uploads_total", "outcome" => "success").increment(1);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::storage::in_memory::{InMemoryStorage, StorageCall};

    fn submission(notes: Option<&str>, file_name: &str) -> ProofSubmission {
        ProofSubmission {
            name: "Jane Doe".to_string(),
            order_number: "1001".to_string(),
            mobile: "+15550100".to_string(),
            email: "jane@example.com".to_string(),
            notes: notes.map(str::to_string),
            image: ProofImage {
                file_name: file_name.to_string(),
                mime_type: "image/png".to_string(),
                content: Bytes::from_static(b"png"),
            },
        }
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("receipt.png"), ".png");
        assert_eq!(extension("photo.PNG"), ".PNG");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("scan."), ".");
        assert_eq!(extension("."), "");
        assert_eq!(extension(".."), "");
        assert_eq!(extension("..."), ".");
        assert_eq!(extension(".a.b"), ".b");
        assert_eq!(extension("dir.d/file"), "");
        assert_eq!(extension("uploads/img.jpeg"), ".jpeg");
        assert_eq!(extension(""), "");
    }

    #[test]
    fn test_destination_file_name() {
        let sub = submission(None, "IMG_2024.JPG");
        assert_eq!(sub.destination_file_name(1_700_000_000_123), "Payment_Proof_1001_1700000000123.JPG");

        let sub = submission(None, "screenshot");
        assert_eq!(sub.destination_file_name(42), "Payment_Proof_1001_42");
    }

    #[test]
    fn test_description() {
        let sub = submission(Some("Paid via bank transfer"), "a.png");
        assert_eq!(
            sub.description(),
            "Proof of payment for Order #1001\nCustomer: Jane Doe\nEmail: jane@example.com\nMobile: +15550100\nNotes: Paid via bank transfer"
        );

        let sub = submission(None, "a.png");
        assert!(sub.description().ends_with("\nNotes: None"));
    }

    #[tokio::test]
    async fn test_upload_creates_then_grants_with_returned_id() {
        let storage = Arc::new(InMemoryStorage::new());
        let uploader = ProofUploader::new(storage.clone(), false);

        let stored = uploader.upload(submission(None, "a.png")).await.unwrap();

        let calls = storage.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], StorageCall::Create { name, .. } if name.starts_with("Payment_Proof_1001_") && name.ends_with(".png")));
        assert_eq!(
            calls[1],
            StorageCall::GrantPublicRead {
                file_id: stored.id.clone()
            }
        );
        assert!(storage.get(&stored.id).unwrap().public);
    }

    #[tokio::test]
    async fn test_create_failure_skips_grant() {
        let storage = Arc::new(InMemoryStorage::new().failing_create("Insufficient permissions for the specified parent."));
        let uploader = ProofUploader::new(storage.clone(), false);

        let err = uploader.upload(submission(None, "a.png")).await.unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(storage.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_grant_failure_keeps_file_by_default() {
        let storage = Arc::new(InMemoryStorage::new().failing_grant("Sharing is disabled for this domain."));
        let uploader = ProofUploader::new(storage.clone(), false);

        let err = uploader.upload(submission(None, "a.png")).await.unwrap_err();

        assert_eq!(err.user_message(), "Sharing is disabled for this domain.");
        assert_eq!(storage.len(), 1);
        assert!(!storage.calls().iter().any(|c| matches!(c, StorageCall::Delete { .. })));
    }

    #[tokio::test]
    async fn test_grant_failure_rolls_back_when_enabled() {
        let storage = Arc::new(InMemoryStorage::new().failing_grant("Sharing is disabled for this domain."));
        let uploader = ProofUploader::new(storage.clone(), true);

        let err = uploader.upload(submission(None, "a.png")).await.unwrap_err();

        assert_eq!(err.user_message(), "Sharing is disabled for this domain.");
        assert!(storage.is_empty());
        assert!(matches!(storage.calls().last(), Some(StorageCall::Delete { file_id }) if file_id == "mem-1"));
    }

    #[tokio::test]
    async fn test_failed_rollback_still_reports_grant_error() {
        let storage = Arc::new(
            InMemoryStorage::new()
                .failing_grant("Sharing is disabled for this domain.")
                .failing_delete("Backend error"),
        );
        let uploader = ProofUploader::new(storage.clone(), true);

        let err = uploader.upload(submission(None, "a.png")).await.unwrap_err();

        assert_eq!(err.user_message(), "Sharing is disabled for this domain.");
        assert_eq!(storage.len(), 1);
    }
}
