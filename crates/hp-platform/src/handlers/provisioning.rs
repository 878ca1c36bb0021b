//! Handlers for project creation

use std::sync::Arc;

use async_trait::async_trait;
use hp_events::{best_effort, EventHandler, FireOn, Timing};
use hp_hosting::HostingApi;
use hp_secrets::KeyStore;
use tracing::{debug, info};

use super::{load_project, load_server};
use crate::allocator::ServerAllocator;
use crate::changeset::{Change, ChangeSet};
use crate::collaborators::{BillingService, SubscriptionUpsert};
use crate::domain::{ProjectEnvironment, ProjectService, ServiceProtocol};
use crate::error::{PlatformError, Result};
use crate::events::{service_key, PlatformEvent, PlatformUnitOfWork};
use crate::repository::PlatformStore;

const DEFAULT_BRANCH: &str = "main";

/// Assigns a server slot before commit and stores a new server's signing
/// key right away, deleting it again if the unit of work aborts. After
/// commit checks the server's health.
pub struct ServerAllocationHandler {
    store: Arc<dyn PlatformStore>,
    servers: ServerAllocator,
    keys: Arc<dyn KeyStore>,
    hosting: Arc<dyn HostingApi>,
}

impl ServerAllocationHandler {
    pub fn new(
        store: Arc<dyn PlatformStore>,
        servers: ServerAllocator,
        keys: Arc<dyn KeyStore>,
        hosting: Arc<dyn HostingApi>,
    ) -> Self {
        Self {
            store,
            servers,
            keys,
            hosting,
        }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for ServerAllocationHandler {
    fn name(&self) -> &'static str {
        "server_allocation"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::Both
    }

    async fn pre_commit(&self, event: &PlatformEvent, uow: &mut PlatformUnitOfWork) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let mut project = load_project(self.store.as_ref(), uow.work(), project_id).await?;
        if project.server_id.is_some() {
            debug!(project_id = %project_id, "Project already has a server");
            return Ok(());
        }

        let allocation = self.servers.allocate(&project, uow.work()).await?;
        project.assign_server(&allocation.server.id);

        // The key must exist before a server row referencing it is committed.
        if let Some(secret) = &allocation.secret {
            self.keys.put(&allocation.server.id, secret).await?;
            info!(server_id = %allocation.server.id, store = self.keys.name(), "Stored signing key for new server");
        }

        let work = uow.work_mut();
        match allocation.change {
            Change::Added => work.servers.add(allocation.server),
            Change::Modified => work.servers.modify(allocation.server),
        }
        work.projects.modify(project);
        Ok(())
    }

    async fn post_commit(&self, event: &PlatformEvent, committed: &ChangeSet) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let project = load_project(self.store.as_ref(), committed, project_id).await?;
        let Some(server_id) = project.server_id else {
            return Err(PlatformError::internal(format!(
                "project {} committed without a server",
                project_id
            )));
        };

        let server = load_server(self.store.as_ref(), committed, &server_id).await?;
        best_effort("server_health_check", self.hosting.health(&server.target())).await;
        Ok(())
    }

    async fn abort(&self, event: &PlatformEvent, pending: &ChangeSet) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let Some(server_id) = pending.projects.get(project_id).and_then(|p| p.server_id.as_deref()) else {
            return Ok(());
        };
        if pending.servers.change_of(server_id) != Some(Change::Added) {
            return Ok(());
        }

        self.keys.delete(server_id).await?;
        info!(server_id = %server_id, "Deleted signing key of uncommitted server");
        Ok(())
    }
}

/// Gives projects without services the default set, then requests an
/// internal domain for every HTTP service
pub struct RequestInternalDomainsHandler {
    store: Arc<dyn PlatformStore>,
    default_services: Vec<ProjectService>,
}

impl RequestInternalDomainsHandler {
    pub fn new(store: Arc<dyn PlatformStore>, default_services: Vec<ProjectService>) -> Self {
        Self {
            store,
            default_services,
        }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for RequestInternalDomainsHandler {
    fn name(&self) -> &'static str {
        "request_internal_domains"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PreCommit
    }

    async fn pre_commit(&self, event: &PlatformEvent, uow: &mut PlatformUnitOfWork) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let mut project = load_project(self.store.as_ref(), uow.work(), project_id).await?;
        if project.services.is_empty() && !self.default_services.is_empty() {
            for service in &self.default_services {
                project.upsert_service(service.clone());
            }
            uow.work_mut().projects.modify(project.clone());
        }

        for service in project.services.iter().filter(|s| s.protocol == ServiceProtocol::Http) {
            uow.raise(
                service_key(project_id, &service.name, service.port),
                PlatformEvent::DomainRequested {
                    project_id: project_id.clone(),
                    service_name: service.name.clone(),
                    port: service.port,
                },
                &Timing::PRE,
            );
        }
        Ok(())
    }
}

pub struct CreateDefaultEnvironmentHandler {
    store: Arc<dyn PlatformStore>,
}

impl CreateDefaultEnvironmentHandler {
    pub fn new(store: Arc<dyn PlatformStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for CreateDefaultEnvironmentHandler {
    fn name(&self) -> &'static str {
        "create_default_environment"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PreCommit
    }

    async fn pre_commit(&self, event: &PlatformEvent, uow: &mut PlatformUnitOfWork) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let pending = uow
            .work()
            .environments
            .iter()
            .any(|e| &e.project_id == project_id);
        if pending || !self.store.environments_for_project(project_id).await?.is_empty() {
            return Ok(());
        }

        uow.work_mut()
            .environments
            .add(ProjectEnvironment::new(project_id, DEFAULT_BRANCH, true));
        Ok(())
    }
}

/// Creates or updates the billing subscription once the project exists
pub struct UpsertSubscriptionHandler {
    store: Arc<dyn PlatformStore>,
    billing: Arc<dyn BillingService>,
}

impl UpsertSubscriptionHandler {
    pub fn new(store: Arc<dyn PlatformStore>, billing: Arc<dyn BillingService>) -> Self {
        Self { store, billing }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for UpsertSubscriptionHandler {
    fn name(&self) -> &'static str {
        "upsert_subscription"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PostCommit
    }

    async fn post_commit(&self, event: &PlatformEvent, committed: &ChangeSet) -> Result<()> {
        let PlatformEvent::ProjectCreated { project_id } = event else {
            return Ok(());
        };

        let project = load_project(self.store.as_ref(), committed, project_id).await?;
        self.billing
            .upsert_subscription(&SubscriptionUpsert {
                project_id: project.id.clone(),
                owner_id: project.owner_id.clone(),
                tier: project.tier,
            })
            .await
    }
}
