//! Project use cases

use std::collections::HashSet;
use std::sync::Arc;

use hp_events::Timing;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use super::{ensure_owner, ExecutionContext};
use crate::allocator::DomainAllocator;
use crate::changeset::ChangeSet;
use crate::domain::{validate_repository, Domain, Entity, Project, ProjectService, ServiceTier};
use crate::error::{PlatformError, Result};
use crate::events::{PlatformEvent, PlatformInterceptor, PlatformUnitOfWork};
use crate::repository::PlatformStore;

const MAX_NAME_LEN: usize = 64;

fn validate_services(services: &[ProjectService], domains: &DomainAllocator) -> Result<()> {
    let mut names = HashSet::new();
    for service in services {
        domains
            .check_service_name(&service.name)
            .map_err(PlatformError::validation)?;
        if service.port == 0 {
            return Err(PlatformError::validation(format!(
                "service {} has an invalid port",
                service.name
            )));
        }
        if !names.insert(service.name.to_ascii_lowercase()) {
            return Err(PlatformError::validation(format!(
                "service {} is listed more than once",
                service.name
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Create project
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectCommand {
    pub name: String,
    /// `org/repo`
    pub repository: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tier: Option<ServiceTier>,
    /// Services to expose; the configured defaults are used when empty
    #[serde(default)]
    pub services: Vec<ProjectService>,
}

/// A committed project with everything its creation produced
#[derive(Debug, Clone)]
pub struct ProvisionedProject {
    pub project: Project,
    pub domains: Vec<Domain>,
    /// Best-effort side effects that failed after commit
    pub best_effort_failures: Vec<&'static str>,
}

pub struct CreateProjectUseCase {
    store: Arc<dyn PlatformStore>,
    interceptor: PlatformInterceptor,
    domains: DomainAllocator,
    default_location: String,
}

impl CreateProjectUseCase {
    pub fn new(
        store: Arc<dyn PlatformStore>,
        interceptor: PlatformInterceptor,
        domains: DomainAllocator,
        default_location: impl Into<String>,
    ) -> Self {
        Self {
            store,
            interceptor,
            domains,
            default_location: default_location.into(),
        }
    }

    pub async fn execute(&self, command: CreateProjectCommand, ctx: &ExecutionContext) -> Result<ProvisionedProject> {
        let name = command.name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(PlatformError::validation(format!(
                "project name must be 1 to {} characters",
                MAX_NAME_LEN
            )));
        }
        validate_repository(&command.repository).map_err(PlatformError::validation)?;
        validate_services(&command.services, &self.domains)?;

        let location = command
            .location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.default_location.clone());

        let mut project = Project::new(
            &ctx.principal_id,
            name,
            &command.repository,
            location,
            command.tier.unwrap_or_default(),
        );
        project.services = command.services;
        let project_id = project.id.clone();

        let mut uow = PlatformUnitOfWork::new(ChangeSet::new());
        uow.raise(
            project.key(),
            PlatformEvent::ProjectCreated {
                project_id: project_id.clone(),
            },
            &Timing::BOTH,
        );
        uow.notify(PlatformEvent::ProjectProvisioned {
            project_id: project_id.clone(),
            owner_id: ctx.principal_id.clone(),
        });
        uow.work_mut().projects.add(project);

        let committed = self
            .interceptor
            .save_changes(uow, self.store.as_ref(), &ctx.cancel)
            .await
            .map_err(|e| PlatformError::from(e).committed_entity(&project_id))?;

        let project = committed
            .work
            .projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| PlatformError::internal("created project missing from change set"))?;
        let domains = committed
            .work
            .domains
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();

        info!(
            execution_id = %ctx.execution_id,
            project_id = %project_id,
            server_id = ?project.server_id,
            domains = domains.len(),
            passes = committed.passes,
            "Project created"
        );

        Ok(ProvisionedProject {
            project,
            domains,
            best_effort_failures: committed.best_effort_failures,
        })
    }
}

// ============================================================================
// Report discovered services
// ============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportServicesCommand {
    #[serde(skip)]
    pub project_id: String,
    pub services: Vec<ProjectService>,
}

pub struct ReportServicesUseCase {
    store: Arc<dyn PlatformStore>,
    interceptor: PlatformInterceptor,
    domains: DomainAllocator,
}

impl ReportServicesUseCase {
    pub fn new(store: Arc<dyn PlatformStore>, interceptor: PlatformInterceptor, domains: DomainAllocator) -> Self {
        Self {
            store,
            interceptor,
            domains,
        }
    }

    /// Merge the reported services and return the project's domains
    pub async fn execute(&self, command: ReportServicesCommand, ctx: &ExecutionContext) -> Result<Vec<Domain>> {
        if command.services.is_empty() {
            return Err(PlatformError::validation("at least one service must be reported"));
        }
        validate_services(&command.services, &self.domains)?;

        let project = self
            .store
            .get_project(&command.project_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(Project::ENTITY_TYPE, &command.project_id))?;
        ensure_owner(&project, ctx)?;

        let mut uow = PlatformUnitOfWork::new(ChangeSet::new());
        uow.raise(
            project.key(),
            PlatformEvent::ServicesDiscovered {
                project_id: project.id.clone(),
                services: command.services,
            },
            &Timing::PRE,
        );

        let committed = self
            .interceptor
            .save_changes(uow, self.store.as_ref(), &ctx.cancel)
            .await
            .map_err(|e| PlatformError::from(e).committed_entity(&project.id))?;
        info!(
            execution_id = %ctx.execution_id,
            project_id = %project.id,
            new_domains = committed.work.domains.len(),
            "Services reported"
        );

        self.store.domains_for_project(&project.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_services() {
        let domains = DomainAllocator::new("hostpilot.app", "frontend", "backend");
        assert!(validate_services(&[ProjectService::http("web", 3000)], &domains).is_ok());
        assert!(validate_services(&[ProjectService::http("web", 0)], &domains).is_err());
        assert!(validate_services(&[ProjectService::http(" ", 80)], &domains).is_err());
        assert!(validate_services(
            &[ProjectService::http("web", 3000), ProjectService::http("WEB", 3001)],
            &domains
        )
        .is_err());
    }

    #[test]
    fn test_service_names_must_be_hostname_labels() {
        let domains = DomainAllocator::new("hostpilot.app", "frontend", "backend");
        let err = validate_services(&[ProjectService::http("My Web.app", 3000)], &domains).unwrap_err();
        assert!(matches!(err, PlatformError::Validation { .. }));
        assert!(validate_services(&[ProjectService::http("web-", 3000)], &domains).is_err());
        assert!(validate_services(&[ProjectService::http("Worker", 3000)], &domains).is_ok());
    }

    #[test]
    fn test_api_is_reserved_for_the_secondary_service() {
        let domains = DomainAllocator::new("hostpilot.app", "frontend", "backend");
        assert!(validate_services(&[ProjectService::http("api", 8080)], &domains).is_err());
        assert!(validate_services(&[ProjectService::http("backend", 8080)], &domains).is_ok());
    }
}
