//! Event handlers
//!
//! Every handler is registered explicitly in [`build_registry`], keyed by the
//! event kind it reacts to. Registration order is execution order.

mod deployments;
mod domains;
mod notifications;
mod provisioning;

pub use deployments::{DispatchDeploymentHandler, PublishDeploymentUpdateHandler};
pub use domains::{AllocateInternalDomainHandler, RefreshServerDomainsHandler, SyncDiscoveredServicesHandler};
pub use notifications::NotifyOwnerHandler;
pub use provisioning::{
    CreateDefaultEnvironmentHandler, RequestInternalDomainsHandler, ServerAllocationHandler,
    UpsertSubscriptionHandler,
};

use std::sync::{Arc, Weak};

use hp_config::DispatchMode;
use hp_hosting::HostingApi;
use hp_secrets::KeyStore;

use crate::allocator::{DomainAllocator, ServerAllocator};
use crate::changeset::ChangeSet;
use crate::collaborators::{BillingService, Notifier};
use crate::domain::{Entity, Project, ProjectService, Server};
use crate::error::{PlatformError, Result};
use crate::events::{PlatformEventKind, PlatformRegistry};
use crate::repository::PlatformStore;
use crate::service::{DeploymentDispatcher, SessionRegistry};

/// Everything the handlers need, shared by reference
#[derive(Clone)]
pub struct HandlerDeps {
    pub store: Arc<dyn PlatformStore>,
    pub keys: Arc<dyn KeyStore>,
    pub hosting: Arc<dyn HostingApi>,
    pub billing: Arc<dyn BillingService>,
    pub notifier: Arc<dyn Notifier>,
    pub sessions: Arc<SessionRegistry>,
    pub domains: DomainAllocator,
    pub servers: ServerAllocator,
    /// Services given to projects created without any
    pub default_services: Vec<ProjectService>,
    pub deploy_mode: DispatchMode,
}

/// Build the handler registry.
///
/// The deploy handler only holds a weak reference to the dispatcher, which
/// itself owns the interceptor this registry ends up in.
pub fn build_registry(deps: &HandlerDeps, dispatcher: Weak<DeploymentDispatcher>) -> PlatformRegistry {
    let notify_owner = Arc::new(NotifyOwnerHandler::new(deps.store.clone(), deps.notifier.clone()));

    PlatformRegistry::new()
        // Project creation
        .with(
            PlatformEventKind::ProjectCreated,
            Arc::new(ServerAllocationHandler::new(
                deps.store.clone(),
                deps.servers.clone(),
                deps.keys.clone(),
                deps.hosting.clone(),
            )),
        )
        .with(
            PlatformEventKind::ProjectCreated,
            Arc::new(RequestInternalDomainsHandler::new(
                deps.store.clone(),
                deps.default_services.clone(),
            )),
        )
        .with(
            PlatformEventKind::ProjectCreated,
            Arc::new(CreateDefaultEnvironmentHandler::new(deps.store.clone())),
        )
        .with(
            PlatformEventKind::ProjectCreated,
            Arc::new(UpsertSubscriptionHandler::new(deps.store.clone(), deps.billing.clone())),
        )
        // Services and domains
        .with(
            PlatformEventKind::ServicesDiscovered,
            Arc::new(SyncDiscoveredServicesHandler::new(deps.store.clone())),
        )
        .with(
            PlatformEventKind::DomainRequested,
            Arc::new(AllocateInternalDomainHandler::new(deps.store.clone(), deps.domains.clone())),
        )
        .with(
            PlatformEventKind::DomainsChanged,
            Arc::new(RefreshServerDomainsHandler::new(deps.store.clone(), deps.hosting.clone())),
        )
        // Deployments
        .with(
            PlatformEventKind::DeploymentQueued,
            Arc::new(DispatchDeploymentHandler::new(dispatcher, deps.deploy_mode)),
        )
        .with(
            PlatformEventKind::DeploymentStatusChanged,
            Arc::new(PublishDeploymentUpdateHandler::new(deps.sessions.clone())),
        )
        // Notifications
        .with(PlatformEventKind::ProjectProvisioned, notify_owner.clone())
        .with(PlatformEventKind::DeploymentFinished, notify_owner)
}

/// The project as this unit of work sees it: pending version first, then
/// the stored one
pub(crate) async fn load_project(store: &dyn PlatformStore, pending: &ChangeSet, id: &str) -> Result<Project> {
    if let Some(project) = pending.projects.get(id) {
        return Ok(project.clone());
    }
    store
        .get_project(id)
        .await?
        .ok_or_else(|| PlatformError::not_found(Project::ENTITY_TYPE, id))
}

pub(crate) async fn load_server(store: &dyn PlatformStore, pending: &ChangeSet, id: &str) -> Result<Server> {
    if let Some(server) = pending.servers.get(id) {
        return Ok(server.clone());
    }
    store
        .get_server(id)
        .await?
        .ok_or_else(|| PlatformError::not_found(Server::ENTITY_TYPE, id))
}
