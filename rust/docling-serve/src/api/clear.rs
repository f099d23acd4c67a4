//! Maintenance endpoints: evict converters, bulk-delete old results.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::datamodel::responses::ClearResponse;
use crate::AppState;

use super::error_response;

/// Clear routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1alpha/clear/converters", get(clear_converters))
        .route("/v1alpha/clear/results", get(clear_results))
}

/// Evict every cached converter.
#[utoipa::path(
    get,
    path = "/v1alpha/clear/converters",
    responses((status = 200, description = "Cache cleared", body = ClearResponse))
)]
pub async fn clear_converters(State(state): State<AppState>) -> Json<ClearResponse> {
    state.converter_cache.clear();
    Json(ClearResponse::default())
}

#[derive(Debug, Deserialize)]
pub struct ClearResultsQuery {
    /// Age threshold in seconds. The spelling is kept for wire
    /// compatibility.
    #[serde(default = "default_older_then")]
    pub older_then: f64,
}

fn default_older_then() -> f64 {
    3600.0
}

/// Delete every completed task older than `older_then` seconds.
#[utoipa::path(
    get,
    path = "/v1alpha/clear/results",
    params(("older_then" = Option<f64>, Query, description = "Age threshold in seconds")),
    responses((status = 200, description = "Old results deleted", body = ClearResponse))
)]
pub async fn clear_results(
    State(state): State<AppState>,
    Query(query): Query<ClearResultsQuery>,
) -> Response {
    match state.orchestrator.clear_results(query.older_then).await {
        Ok(()) => Json(ClearResponse::default()).into_response(),
        Err(err) => error_response(&err),
    }
}
