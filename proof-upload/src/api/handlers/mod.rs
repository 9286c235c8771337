//! Axum route handlers.
//!
//! - [`uploads`]: proof-of-payment upload (multipart form in, public link out)
//! - [`health`]: liveness check

pub mod health;
pub mod uploads;
