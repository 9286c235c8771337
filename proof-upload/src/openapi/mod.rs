//! OpenAPI documentation for the public `/apps/api/*` endpoints.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Proof Upload API",
        description = "Accepts proof-of-payment screenshots and stores them as publicly viewable files."
    ),
    servers(
        (url = "/apps/api", description = "Proof upload API")
    ),
    paths(
        api::handlers::uploads::upload_proof,
        api::handlers::health::health,
    ),
    components(
        schemas(
            api::models::uploads::ProofUploadForm,
            api::models::uploads::UploadResponse,
            api::models::uploads::ErrorResponse,
            api::models::health::HealthResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Proof-of-payment uploads"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
