//! Projects API
//!
//! Project creation, service discovery reports, deploy requests and the
//! realtime deployment stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::api::common::ApiError;
use crate::api::middleware::{AppState, Caller};
use crate::domain::{Domain, DomainKind, Project, ProjectService, ProjectState, ServiceTier};
use crate::error::PlatformError;
use crate::operations::{CreateProjectCommand, DeployProjectCommand, DeploymentTicket, ReportServicesCommand};
use crate::service::SessionGuard;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainResponse {
    pub id: String,
    pub hostname: String,
    pub service_name: String,
    pub port: u16,
    pub kind: DomainKind,
    pub primary: bool,
    pub verified: bool,
}

impl From<Domain> for DomainResponse {
    fn from(d: Domain) -> Self {
        Self {
            id: d.id,
            hostname: d.hostname,
            service_name: d.service_name,
            port: d.port,
            kind: d.kind,
            primary: d.primary,
            verified: d.verified,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub repository: String,
    pub location: String,
    pub server_id: Option<String>,
    pub state: ProjectState,
    pub tier: ServiceTier,
    pub services: Vec<ProjectService>,
    pub domains: Vec<DomainResponse>,
    /// Side effects that failed after the project was committed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ProjectResponse {
    fn new(project: Project, domains: Vec<Domain>, warnings: Vec<String>) -> Self {
        Self {
            id: project.id,
            name: project.name,
            repository: project.repository,
            location: project.location,
            server_id: project.server_id,
            state: project.state,
            tier: project.tier,
            services: project.services,
            domains: domains.into_iter().map(Into::into).collect(),
            warnings,
            created_at: project.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTicketResponse {
    pub deployment_id: String,
    pub status: crate::domain::DeploymentStatus,
    pub status_url: String,
    pub created: bool,
}

impl From<DeploymentTicket> for DeploymentTicketResponse {
    fn from(t: DeploymentTicket) -> Self {
        Self {
            deployment_id: t.deployment.id,
            status: t.deployment.status,
            status_url: t.status_url,
            created: t.created,
        }
    }
}

/// Create a project
#[utoipa::path(
    post,
    path = "/projects",
    tag = "projects",
    request_body = CreateProjectCommand,
    responses(
        (status = 201, description = "Project provisioned", body = ProjectResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing caller identity", body = ApiError),
        (status = 502, description = "Committed, but a required side effect failed", body = ApiError)
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    caller: Caller,
    Json(command): Json<CreateProjectCommand>,
) -> Result<(StatusCode, Json<ProjectResponse>), PlatformError> {
    let ctx = caller.context();
    let provisioned = state.create_project.execute(command, &ctx).await?;

    let warnings = provisioned
        .best_effort_failures
        .iter()
        .map(|h| format!("{} failed", h))
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse::new(provisioned.project, provisioned.domains, warnings)),
    ))
}

/// Report the services a project's server discovered
#[utoipa::path(
    post,
    path = "/projects/{id}/services",
    tag = "projects",
    params(
        ("id" = String, Path, description = "Project ID")
    ),
    request_body = ReportServicesCommand,
    responses(
        (status = 200, description = "Current domains of the project", body = Vec<DomainResponse>),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 403, description = "Not the project owner", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    )
)]
pub async fn report_services(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(mut command): Json<ReportServicesCommand>,
) -> Result<Json<Vec<DomainResponse>>, PlatformError> {
    command.project_id = id;
    let domains = state.report_services.execute(command, &caller.context()).await?;
    Ok(Json(domains.into_iter().map(Into::into).collect()))
}

/// Deploy a commit
#[utoipa::path(
    post,
    path = "/projects/{id}/deployments",
    tag = "deployments",
    params(
        ("id" = String, Path, description = "Project ID")
    ),
    request_body = DeployProjectCommand,
    responses(
        (status = 202, description = "Deployment queued", body = DeploymentTicketResponse),
        (status = 200, description = "Commit already in flight", body = DeploymentTicketResponse),
        (status = 403, description = "Not the project owner", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    )
)]
pub async fn deploy_project(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(mut command): Json<DeployProjectCommand>,
) -> Result<(StatusCode, Json<DeploymentTicketResponse>), PlatformError> {
    command.project_id = id;
    let ticket = state.deploy_project.execute(command, &caller.context()).await?;
    let status = if ticket.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ticket.into())))
}

/// Stream deployment status updates of a project as server-sent events
#[utoipa::path(
    get,
    path = "/projects/{id}/deployments/stream",
    tag = "deployments",
    params(
        ("id" = String, Path, description = "Project ID")
    ),
    responses(
        (status = 200, description = "Event stream of DeploymentUpdate", content_type = "text/event-stream"),
        (status = 403, description = "Not the project owner", body = ApiError)
    )
)]
pub async fn stream_deployments(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PlatformError> {
    let project = state.deployments.owned_project(&id, &caller.context()).await?;

    let subscription = state.sessions.connect(&project.id);
    let guard = SessionGuard::new(state.sessions.clone(), &project.id, subscription.session_id);

    let updates = stream::unfold((subscription.receiver, guard), |(mut rx, guard)| async move {
        let update = rx.recv().await?;
        let event = match Event::default().event("deployment").json_data(&update) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to encode deployment update");
                Event::default().comment("unencodable update")
            }
        };
        Some((Ok(event), (rx, guard)))
    });

    Ok(Sse::new(updates).keep_alive(KeepAlive::default()))
}
