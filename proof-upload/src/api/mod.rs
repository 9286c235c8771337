//! HTTP API: route handlers and their request/response bodies.
//!
//! - **[`handlers`]**: Axum handlers for the upload and health endpoints
//! - **[`models`]**: JSON bodies returned by those handlers
//!
//! All routes live under `/apps/api`. The OpenAPI document is served at
//! `/apps/api/openapi.json` and rendered at `/apps/api/docs`.

pub mod handlers;
pub mod models;
