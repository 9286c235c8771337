//! In-memory storage backend
//!
//! Keeps uploaded files in a process-local map and hands out `memory://` links. Used for
//! local development (`storage.backend: in_memory`) and as the storage double in tests,
//! where it records every call and can be told to fail a given operation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{NewFile, ProofStorage, Result, StorageError, StoredFile};

/// One call made against the storage, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Create { name: String, mime_type: String, size: usize },
    GrantPublicRead { file_id: String },
    Delete { file_id: String },
}

/// A file held by [`InMemoryStorage`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub file: NewFile,
    pub public: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    next_id: AtomicU64,
    files: Mutex<HashMap<String, StoredObject>>,
    calls: Mutex<Vec<StorageCall>>,
    fail_create: Option<String>,
    fail_grant: Option<String>,
    fail_delete: Option<String>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create_file` call fail with `message`
    pub fn failing_create(mut self, message: impl Into<String>) -> Self {
        self.fail_create = Some(message.into());
        self
    }

    /// Make every `grant_public_read` call fail with `message`
    pub fn failing_grant(mut self, message: impl Into<String>) -> Self {
        self.fail_grant = Some(message.into());
        self
    }

    /// Make every `delete_file` call fail with `message`
    pub fn failing_delete(mut self, message: impl Into<String>) -> Self {
        self.fail_delete = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn get(&self, file_id: &str) -> Option<StoredObject> {
        self.files.lock().expect("files lock poisoned").get(file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().expect("files lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }

    fn injected(message: &Option<String>) -> Result<()> {
        match message {
            Some(message) => Err(StorageError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProofStorage for InMemoryStorage {
    async fn create_file(&self, file: NewFile) -> Result<StoredFile> {
        self.record(StorageCall::Create {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.content.len(),
        });
        Self::injected(&self.fail_create)?;

        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let stored = StoredFile {
            id: id.clone(),
            name: file.name.clone(),
            web_view_link: Some(format!("memory://proofs/{id}/view")),
            web_content_link: Some(format!("memory://proofs/{id}/content")),
        };

        self.files
            .lock()
            .expect("files lock poisoned")
            .insert(id, StoredObject { file, public: false });

        Ok(stored)
    }

    async fn grant_public_read(&self, file_id: &str) -> Result<()> {
        self.record(StorageCall::GrantPublicRead {
            file_id: file_id.to_string(),
        });
        Self::injected(&self.fail_grant)?;

        match self.files.lock().expect("files lock poisoned").get_mut(file_id) {
            Some(object) => {
                object.public = true;
                Ok(())
            }
            None => Err(StorageError::Api {
                status: 404,
                message: format!("File not found: {file_id}."),
            }),
        }
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.record(StorageCall::Delete {
            file_id: file_id.to_string(),
        });
        Self::injected(&self.fail_delete)?;

        match self.files.lock().expect("files lock poisoned").remove(file_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::Api {
                status: 404,
                message: format!("File not found: {file_id}."),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn new_file(name: &str) -> NewFile {
        NewFile {
            name: name.to_string(),
            description: "test".to_string(),
            mime_type: "image/jpeg".to_string(),
            content: Bytes::from_static(b"jpeg"),
        }
    }

    #[tokio::test]
    async fn test_create_grant_delete() {
        let storage = InMemoryStorage::new();

        let stored = storage.create_file(new_file("a.jpg")).await.unwrap();
        assert_eq!(stored.id, "mem-1");
        assert!(!storage.get("mem-1").unwrap().public);

        storage.grant_public_read(&stored.id).await.unwrap();
        assert!(storage.get("mem-1").unwrap().public);

        storage.delete_file(&stored.id).await.unwrap();
        assert!(storage.is_empty());

        assert_eq!(
            storage.calls(),
            vec![
                StorageCall::Create {
                    name: "a.jpg".to_string(),
                    mime_type: "image/jpeg".to_string(),
                    size: 4
                },
                StorageCall::GrantPublicRead {
                    file_id: "mem-1".to_string()
                },
                StorageCall::Delete {
                    file_id: "mem-1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let storage = InMemoryStorage::new();
        let a = storage.create_file(new_file("a.jpg")).await.unwrap();
        let b = storage.create_file(new_file("b.jpg")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let storage = InMemoryStorage::new();
        assert!(storage.grant_public_read("nope").await.is_err());
        assert!(storage.delete_file("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_are_still_recorded() {
        let storage = InMemoryStorage::new().failing_create("Quota exceeded");

        let err = storage.create_file(new_file("a.jpg")).await.unwrap_err();
        assert_eq!(err.to_string(), "Quota exceeded");
        assert_eq!(storage.calls().len(), 1);
        assert!(storage.is_empty());
    }
}
