//! Liveness endpoints.

use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};

use crate::datamodel::responses::HealthCheckResponse;
use crate::AppState;

/// Health routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // API readiness compatibility for OpenShift AI Workbench.
        .route("/api", get(health))
        .route("/favicon.ico", get(favicon))
}

/// Basic health check.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is alive", body = HealthCheckResponse))
)]
pub async fn health() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse::default())
}

async fn favicon() -> Redirect {
    Redirect::to("https://ds4sd.github.io/docling/assets/logo.png")
}
