//! API Middleware
//!
//! Shared state and caller identity extraction.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::api::common::ApiError;
use crate::operations::{
    CancelDeploymentUseCase, CreateProjectUseCase, DeployProjectUseCase, DeploymentQueries, ExecutionContext,
    ReportServicesUseCase,
};
use crate::service::SessionRegistry;

/// Header carrying the caller's user id, set by the upstream identity provider
pub const USER_ID_HEADER: &str = "x-user-id";

/// Application state containing shared use cases
#[derive(Clone)]
pub struct AppState {
    pub create_project: Arc<CreateProjectUseCase>,
    pub report_services: Arc<ReportServicesUseCase>,
    pub deploy_project: Arc<DeployProjectUseCase>,
    pub cancel_deployment: Arc<CancelDeploymentUseCase>,
    pub deployments: Arc<DeploymentQueries>,
    pub sessions: Arc<SessionRegistry>,
}

/// Extractor for the authenticated caller
pub struct Caller(pub String);

impl Caller {
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::create(&self.0)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                let error = ApiError::new("UNAUTHORIZED", format!("Missing {} header", USER_ID_HEADER));
                (StatusCode::UNAUTHORIZED, Json(error)).into_response()
            })?;

        Ok(Caller(user_id.to_string()))
    }
}
