//! # proof-upload: payment proof upload service
//!
//! `proof-upload` accepts a proof-of-payment screenshot from a storefront form, stores it in a
//! cloud drive folder together with the order details, makes it viewable by link, and returns
//! that link to the caller.
//!
//! ## Request Flow
//!
//! A `POST /apps/api/proof-upload` request carries a multipart form with a `screenshot` file and
//! the text fields `name`, `orderNumber`, `mobile`, `email` and `notes`. The handler streams the
//! form, rejecting anything that is not an image or exceeds the size limit before a single byte
//! is sent to storage. Accepted files are named `Payment_Proof_<order>_<millis><ext>` and
//! handed to the [`proof::ProofUploader`], which creates the file and then grants public read
//! access on it. Either storage call failing yields a 500 with the provider's message.
//!
//! ## Storage
//!
//! Storage sits behind the [`storage::ProofStorage`] trait. The Google Drive backend talks to
//! the Drive v3 REST API with either a service-account key or a static access token; the
//! in-memory backend is used for local runs and tests.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML/environment layering.
//!
//! ## Testing
//!
//! Handler tests run the full router through `axum-test` against the in-memory backend; the
//! Drive client is tested against `wiremock`.

pub mod api;
pub mod config;
pub mod errors;
pub mod openapi;
pub mod proof;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

use std::sync::{Arc, OnceLock};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use axum_prometheus::{PrometheusMetricLayer, metrics_exporter_prometheus::PrometheusHandle};
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    config::CorsOrigin,
    openapi::ApiDoc,
    proof::ProofUploader,
    storage::{ProofStorage, create_storage},
};

/// Shared state handed to every handler.
///
/// # Example
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .uploader(ProofUploader::new(storage, false))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub uploader: ProofUploader,
}

impl AppState {
    /// State for `config` with uploads going to `storage`.
    pub fn new(config: Config, storage: Arc<dyn ProofStorage>) -> Self {
        let uploader = ProofUploader::new(storage, config.upload.rollback_on_permission_failure);
        Self::builder().config(config).uploader(uploader).build()
    }
}

/// A `*` entry allows any origin; tower-http refuses `*` inside an origin list.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// The Prometheus recorder is process-global, so the layer and its handle are created once.
fn prometheus_pair() -> (PrometheusMetricLayer<'static>, PrometheusHandle) {
    static PROMETHEUS: OnceLock<(PrometheusMetricLayer<'static>, PrometheusHandle)> = OnceLock::new();
    PROMETHEUS.get_or_init(PrometheusMetricLayer::pair).clone()
}

/// Build the application router.
///
/// - `/apps/api/proof-upload` with a body limit sized for one file plus form fields
/// - `/apps/api/health`
/// - `/apps/api/openapi.json` and the Scalar viewer at `/apps/api/docs`
/// - `/internal/metrics` when `enable_metrics` is set
///
/// CORS and request tracing wrap every route.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let body_limit = state.config.upload.body_limit();

    let api_routes = Router::new()
        .route(
            "/proof-upload",
            post(api::handlers::uploads::upload_proof).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/health", get(api::handlers::health::health))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    let router = Router::new()
        .nest("/apps/api", api_routes)
        .merge(Scalar::with_url("/apps/api/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = prometheus_pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// A configured service, ready to be served.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create the application with the storage backend named in `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let storage = create_storage(&config.storage)?;
        Self::with_storage(config, storage)
    }

    /// Create the application around an existing storage backend.
    pub fn with_storage(config: Config, storage: Arc<dyn ProofStorage>) -> anyhow::Result<Self> {
        debug!(
            backend = ?config.storage.backend,
            max_file_size = config.upload.max_file_size,
            rollback_on_permission_failure = config.upload.rollback_on_permission_failure,
            "Starting proof upload service"
        );

        let state = AppState::new(config.clone(), storage);
        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Proof upload service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
