//! Deployment use cases

use std::sync::Arc;

use hp_common::{parse_build_log, BuildLogEntry};
use hp_events::{DispatchError, Timing};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use super::{ensure_owner, ExecutionContext};
use crate::changeset::ChangeSet;
use crate::collaborators::BuildLogStore;
use crate::domain::{CommitInfo, Deployment, DeploymentStatus, Entity, Project};
use crate::error::{PlatformError, Result};
use crate::events::{PlatformEvent, PlatformInterceptor, PlatformUnitOfWork};
use crate::repository::PlatformStore;
use crate::service::DeploymentDispatcher;

async fn load_project(store: &dyn PlatformStore, id: &str) -> Result<Project> {
    store
        .get_project(id)
        .await?
        .ok_or_else(|| PlatformError::not_found(Project::ENTITY_TYPE, id))
}

async fn load_deployment(store: &dyn PlatformStore, id: &str) -> Result<Deployment> {
    store
        .get_deployment(id)
        .await?
        .ok_or_else(|| PlatformError::not_found(Deployment::ENTITY_TYPE, id))
}

/// Load a deployment and check the caller owns its project
async fn owned_deployment(store: &dyn PlatformStore, id: &str, ctx: &ExecutionContext) -> Result<Deployment> {
    let deployment = load_deployment(store, id).await?;
    let project = load_project(store, &deployment.project_id).await?;
    ensure_owner(&project, ctx)?;
    Ok(deployment)
}

// ============================================================================
// Deploy project
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployProjectCommand {
    #[serde(skip)]
    pub project_id: String,
    pub commit_hash: String,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Handle on a queued (or already in-flight) deployment
#[derive(Debug, Clone)]
pub struct DeploymentTicket {
    pub deployment: Deployment,
    pub status_url: String,
    /// False when an in-flight deployment of the same commit was returned
    pub created: bool,
}

impl DeploymentTicket {
    fn new(deployment: Deployment, created: bool) -> Self {
        Self {
            status_url: deployment.status_url(),
            deployment,
            created,
        }
    }
}

pub struct DeployProjectUseCase {
    store: Arc<dyn PlatformStore>,
    interceptor: PlatformInterceptor,
}

impl DeployProjectUseCase {
    pub fn new(store: Arc<dyn PlatformStore>, interceptor: PlatformInterceptor) -> Self {
        Self { store, interceptor }
    }

    /// Queue a deployment of a commit. Deploying a commit that is already
    /// queued or deploying returns the existing deployment.
    pub async fn execute(&self, command: DeployProjectCommand, ctx: &ExecutionContext) -> Result<DeploymentTicket> {
        let hash = command.commit_hash.trim();
        if hash.is_empty() {
            return Err(PlatformError::validation("commit hash is required"));
        }

        let project = load_project(self.store.as_ref(), &command.project_id).await?;
        ensure_owner(&project, ctx)?;

        if let Some(existing) = self.store.find_in_flight_deployment(&project.id, hash).await? {
            info!(deployment_id = %existing.id, commit = hash, "Commit already in flight");
            return Ok(DeploymentTicket::new(existing, false));
        }

        let mut commit = CommitInfo::new(hash);
        commit.message = command.commit_message;
        commit.author = command.author;
        commit.author_email = command.author_email;
        commit.branch = command.branch;

        let deployment = Deployment::queue(&project.id, project.server_id.clone(), commit);
        let deployment_id = deployment.id.clone();

        let mut uow = PlatformUnitOfWork::new(ChangeSet::new());
        // Queued must reach subscribers before dispatch can publish later statuses.
        uow.raise(
            deployment.key(),
            PlatformEvent::DeploymentStatusChanged {
                deployment_id: deployment_id.clone(),
                project_id: project.id.clone(),
                status: DeploymentStatus::Queued,
            },
            &Timing::POST,
        );
        uow.raise(
            deployment.key(),
            PlatformEvent::DeploymentQueued {
                deployment_id: deployment_id.clone(),
            },
            &Timing::POST,
        );
        uow.work_mut().deployments.add(deployment);

        match self
            .interceptor
            .save_changes(uow, self.store.as_ref(), &ctx.cancel)
            .await
        {
            Ok(_) => {}
            // Lost a race with a concurrent request for the same commit
            Err(DispatchError::Commit(PlatformError::Duplicate { .. })) => {
                if let Some(existing) = self.store.find_in_flight_deployment(&project.id, hash).await? {
                    return Ok(DeploymentTicket::new(existing, false));
                }
                return Err(PlatformError::duplicate(Deployment::ENTITY_TYPE, "commit", hash));
            }
            Err(e) => return Err(PlatformError::from(e).committed_entity(&deployment_id)),
        }

        info!(
            execution_id = %ctx.execution_id,
            deployment_id = %deployment_id,
            project_id = %project.id,
            commit = hash,
            "Deployment queued"
        );

        let deployment = load_deployment(self.store.as_ref(), &deployment_id).await?;
        Ok(DeploymentTicket::new(deployment, true))
    }
}

// ============================================================================
// Cancel deployment
// ============================================================================

#[derive(Debug, Clone)]
pub struct CancelDeploymentCommand {
    pub deployment_id: String,
    pub reason: Option<String>,
}

pub struct CancelDeploymentUseCase {
    store: Arc<dyn PlatformStore>,
    dispatcher: Arc<DeploymentDispatcher>,
}

impl CancelDeploymentUseCase {
    pub fn new(store: Arc<dyn PlatformStore>, dispatcher: Arc<DeploymentDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn execute(&self, command: CancelDeploymentCommand, ctx: &ExecutionContext) -> Result<Deployment> {
        let deployment = owned_deployment(self.store.as_ref(), &command.deployment_id, ctx).await?;
        if !deployment.status.can_transition_to(DeploymentStatus::Cancelled) {
            return Err(PlatformError::InvalidTransition {
                from: deployment.status,
                to: DeploymentStatus::Cancelled,
            });
        }

        let reason = command
            .reason
            .unwrap_or_else(|| format!("Cancelled by {}", ctx.principal_id));

        match self
            .dispatcher
            .transition(&deployment.id, DeploymentStatus::Cancelled, Some(reason))
            .await?
        {
            Some(cancelled) => {
                info!(execution_id = %ctx.execution_id, deployment_id = %cancelled.id, "Deployment cancelled");
                Ok(cancelled)
            }
            None => {
                let current = load_deployment(self.store.as_ref(), &deployment.id).await?;
                Err(PlatformError::InvalidTransition {
                    from: current.status,
                    to: DeploymentStatus::Cancelled,
                })
            }
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

pub struct DeploymentQueries {
    store: Arc<dyn PlatformStore>,
    build_logs: Arc<dyn BuildLogStore>,
}

impl DeploymentQueries {
    pub fn new(store: Arc<dyn PlatformStore>, build_logs: Arc<dyn BuildLogStore>) -> Self {
        Self { store, build_logs }
    }

    pub async fn status(&self, deployment_id: &str, ctx: &ExecutionContext) -> Result<Deployment> {
        owned_deployment(self.store.as_ref(), deployment_id, ctx).await
    }

    /// Parsed build log; empty until the dispatcher uploaded one
    pub async fn logs(&self, deployment_id: &str, ctx: &ExecutionContext) -> Result<Vec<BuildLogEntry>> {
        let deployment = owned_deployment(self.store.as_ref(), deployment_id, ctx).await?;
        let text = self.build_logs.download(&deployment.id).await?;
        Ok(text.map(|t| parse_build_log(&t)).unwrap_or_default())
    }

    /// Project lookup for callers that need an ownership check only
    pub async fn owned_project(&self, project_id: &str, ctx: &ExecutionContext) -> Result<Project> {
        let project = load_project(self.store.as_ref(), project_id).await?;
        ensure_owner(&project, ctx)?;
        Ok(project)
    }
}
