//! API Layer
//!
//! REST endpoints of the control plane. Callers are identified by the
//! `x-user-id` header.

pub mod common;
pub mod deployments;
pub mod middleware;
pub mod openapi;
pub mod projects;

pub use common::{ApiError, HealthResponse};
pub use middleware::{AppState, Caller, USER_ID_HEADER};
pub use openapi::ApiDoc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "monitoring",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/projects", post(projects::create_project))
        .route("/projects/:id/services", post(projects::report_services))
        .route("/projects/:id/deployments", post(projects::deploy_project))
        .route("/projects/:id/deployments/stream", get(projects::stream_deployments))
        .route("/deployments/:id/status", get(deployments::get_deployment_status))
        .route("/deployments/:id/cancel", post(deployments::cancel_deployment))
        .route("/deployments/:id/logs", get(deployments::get_deployment_logs))
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}
