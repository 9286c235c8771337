//! Shared helpers for router-level tests.

use std::sync::Arc;

use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};

use crate::{
    Application,
    config::{Config, StorageBackend},
    storage::ProofStorage,
};

/// Default config with the in-memory backend, so no credentials are needed.
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::InMemory;
    config
}

pub fn create_test_server(storage: Arc<dyn ProofStorage>) -> TestServer {
    create_test_server_with_config(create_test_config(), storage)
}

pub fn create_test_server_with_config(config: Config, storage: Arc<dyn ProofStorage>) -> TestServer {
    Application::with_storage(config, storage)
        .expect("Failed to build application")
        .into_test_server()
}

/// The text fields a storefront sends with every upload.
pub fn order_form() -> MultipartForm {
    MultipartForm::new()
        .add_text("name", "Jane Doe")
        .add_text("orderNumber", "1001")
        .add_text("mobile", "0400000000")
        .add_text("email", "jane@example.com")
        .add_text("notes", "Paid by bank transfer")
}

/// A small PNG file part.
pub fn png_part(file_name: &str) -> Part {
    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    Part::bytes(PNG_HEADER.to_vec())
        .file_name(file_name.to_string())
        .mime_type("image/png")
}
