//! Common API types and utilities

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::error::PlatformError;

/// Standard API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl PlatformError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PlatformError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PlatformError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE"),
            PlatformError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            PlatformError::ServiceNotFound { .. } => (StatusCode::BAD_REQUEST, "SERVICE_NOT_FOUND"),
            PlatformError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            PlatformError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT"),
            PlatformError::Constraint { .. } => (StatusCode::CONFLICT, "CONSTRAINT_VIOLATION"),
            PlatformError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            PlatformError::Hosting(_) => (StatusCode::BAD_GATEWAY, "HOSTING_ERROR"),
            PlatformError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            PlatformError::PostCommit { .. } => (StatusCode::BAD_GATEWAY, "POST_COMMIT_FAILED"),
            PlatformError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            PlatformError::Secrets(_) => (StatusCode::INTERNAL_SERVER_ERROR, "KEY_STORE_ERROR"),
            PlatformError::Configuration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            PlatformError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, code, "Request failed");
        } else {
            warn!(error = %self, code, "Request rejected");
        }

        let details = match &self {
            PlatformError::PostCommit { handler, entity_id, .. } => Some(serde_json::json!({
                "handler": handler,
                "committed": true,
                "entityId": entity_id,
            })),
            _ => None,
        };

        let body = ApiError {
            error: code.to_string(),
            message: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeploymentStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PlatformError::not_found("project", "p1"), StatusCode::NOT_FOUND),
            (PlatformError::validation("bad"), StatusCode::BAD_REQUEST),
            (PlatformError::forbidden("no"), StatusCode::FORBIDDEN),
            (PlatformError::duplicate("domain", "hostname", "x"), StatusCode::CONFLICT),
            (
                PlatformError::InvalidTransition {
                    from: DeploymentStatus::Completed,
                    to: DeploymentStatus::Cancelled,
                },
                StatusCode::CONFLICT,
            ),
            (
                PlatformError::PostCommit {
                    handler: "upsert_subscription".into(),
                    message: "billing down".into(),
                    entity_id: Some("p1".into()),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                PlatformError::Configuration { message: "loop".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
