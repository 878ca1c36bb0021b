//! OpenAPI Documentation

use utoipa::OpenApi;

/// Control plane OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "HostPilot Control Plane API",
        version = "1.0.0",
        description = "Project provisioning, deployments and realtime deployment updates"
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "projects", description = "Project provisioning and services"),
        (name = "deployments", description = "Deployments and build logs"),
        (name = "monitoring", description = "Health")
    ),
    paths(
        super::projects::create_project,
        super::projects::report_services,
        super::projects::deploy_project,
        super::projects::stream_deployments,
        super::deployments::get_deployment_status,
        super::deployments::cancel_deployment,
        super::deployments::get_deployment_logs,
        super::health,
    ),
    components(schemas(
        super::common::ApiError,
        super::common::HealthResponse,
        super::projects::ProjectResponse,
        super::projects::DomainResponse,
        super::projects::DeploymentTicketResponse,
        super::deployments::DeploymentResponse,
        super::deployments::CancelDeploymentRequest,
        super::deployments::BuildLogResponse,
        crate::operations::CreateProjectCommand,
        crate::operations::ReportServicesCommand,
        crate::operations::DeployProjectCommand,
        crate::service::DeploymentUpdate,
    ))
)]
pub struct ApiDoc;
