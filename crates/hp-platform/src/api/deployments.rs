//! Deployments API

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use hp_common::BuildLogEntry;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::common::ApiError;
use crate::api::middleware::{AppState, Caller};
use crate::domain::{CommitInfo, Deployment, DeploymentStatus, StatusChange};
use crate::error::PlatformError;
use crate::operations::CancelDeploymentCommand;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub id: String,
    pub project_id: String,
    pub server_id: Option<String>,
    pub commit: CommitInfo,
    pub status: DeploymentStatus,
    pub status_history: Vec<StatusChange>,
    pub error: Option<String>,
    pub build_duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Deployment> for DeploymentResponse {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            project_id: d.project_id,
            server_id: d.server_id,
            commit: d.commit,
            status: d.status,
            status_history: d.status_history,
            error: d.error,
            build_duration_ms: d.build_duration_ms,
            started_at: d.started_at,
            finished_at: d.finished_at,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelDeploymentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildLogResponse {
    pub deployment_id: String,
    pub entries: Vec<BuildLogEntry>,
}

/// Get deployment status
#[utoipa::path(
    get,
    path = "/deployments/{id}/status",
    tag = "deployments",
    params(
        ("id" = String, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Deployment found", body = DeploymentResponse),
        (status = 403, description = "Not the project owner", body = ApiError),
        (status = 404, description = "Deployment not found", body = ApiError)
    )
)]
pub async fn get_deployment_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, PlatformError> {
    let deployment = state.deployments.status(&id, &caller.context()).await?;
    Ok(Json(deployment.into()))
}

/// Cancel a queued or running deployment
#[utoipa::path(
    post,
    path = "/deployments/{id}/cancel",
    tag = "deployments",
    params(
        ("id" = String, Path, description = "Deployment ID")
    ),
    request_body = CancelDeploymentRequest,
    responses(
        (status = 200, description = "Deployment cancelled", body = DeploymentResponse),
        (status = 404, description = "Deployment not found", body = ApiError),
        (status = 409, description = "Deployment already finished", body = ApiError)
    )
)]
pub async fn cancel_deployment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    request: Option<Json<CancelDeploymentRequest>>,
) -> Result<Json<DeploymentResponse>, PlatformError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let command = CancelDeploymentCommand {
        deployment_id: id,
        reason: request.reason,
    };
    let deployment = state.cancel_deployment.execute(command, &caller.context()).await?;
    Ok(Json(deployment.into()))
}

/// Get the parsed build log of a deployment
#[utoipa::path(
    get,
    path = "/deployments/{id}/logs",
    tag = "deployments",
    params(
        ("id" = String, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Build log entries", body = BuildLogResponse),
        (status = 404, description = "Deployment not found", body = ApiError)
    )
)]
pub async fn get_deployment_logs(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<BuildLogResponse>, PlatformError> {
    let entries = state.deployments.logs(&id, &caller.context()).await?;
    Ok(Json(BuildLogResponse {
        deployment_id: id,
        entries,
    }))
}
