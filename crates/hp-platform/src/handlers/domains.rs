//! Handlers for discovered services and internal domains

use std::sync::Arc;

use async_trait::async_trait;
use hp_events::{EventHandler, FailurePolicy, FireOn, Timing};
use hp_hosting::{DomainBinding, DomainRefreshRequest, HostingApi};
use tracing::{debug, info};

use super::{load_project, load_server};
use crate::allocator::DomainAllocator;
use crate::changeset::ChangeSet;
use crate::domain::{Domain, Entity, ServiceProtocol};
use crate::error::{PlatformError, Result};
use crate::events::{service_key, PlatformEvent, PlatformUnitOfWork};
use crate::repository::PlatformStore;

/// Merges services reported by the hosting server into the project and
/// requests domains for the HTTP ones
pub struct SyncDiscoveredServicesHandler {
    store: Arc<dyn PlatformStore>,
}

impl SyncDiscoveredServicesHandler {
    pub fn new(store: Arc<dyn PlatformStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for SyncDiscoveredServicesHandler {
    fn name(&self) -> &'static str {
        "sync_discovered_services"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PreCommit
    }

    async fn pre_commit(&self, event: &PlatformEvent, uow: &mut PlatformUnitOfWork) -> Result<()> {
        let PlatformEvent::ServicesDiscovered { project_id, services } = event else {
            return Ok(());
        };

        let mut project = load_project(self.store.as_ref(), uow.work(), project_id).await?;
        let mut changed = false;
        for service in services {
            changed |= project.upsert_service(service.clone());
        }
        if changed {
            debug!(project_id = %project_id, services = services.len(), "Project services updated");
            uow.work_mut().projects.modify(project);
        }

        for service in services.iter().filter(|s| s.protocol == ServiceProtocol::Http) {
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

/// Adds the deterministic internal domain for a service unless one already
/// exists, pending or stored
pub struct AllocateInternalDomainHandler {
    store: Arc<dyn PlatformStore>,
    domains: DomainAllocator,
}

impl AllocateInternalDomainHandler {
    pub fn new(store: Arc<dyn PlatformStore>, domains: DomainAllocator) -> Self {
        Self { store, domains }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for AllocateInternalDomainHandler {
    fn name(&self) -> &'static str {
        "allocate_internal_domain"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PreCommit
    }

    async fn pre_commit(&self, event: &PlatformEvent, uow: &mut PlatformUnitOfWork) -> Result<()> {
        let PlatformEvent::DomainRequested {
            project_id,
            service_name,
            port,
        } = event
        else {
            return Ok(());
        };

        let project = load_project(self.store.as_ref(), uow.work(), project_id).await?;
        let Some(service) = project
            .services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(service_name) && s.port == *port)
        else {
            return Err(PlatformError::ServiceNotFound {
                project_id: project_id.clone(),
                service: format!("{}:{}", service_name, port),
            });
        };

        let pending = uow
            .work()
            .domains
            .iter()
            .any(|d| d.is_internal_for(project_id, service_name, *port));
        if pending
            || self
                .store
                .find_internal_domain(project_id, service_name, *port)
                .await?
                .is_some()
        {
            debug!(project_id = %project_id, service = %service_name, port, "Internal domain already exists");
            return Ok(());
        }

        let has_primary = uow
            .work()
            .domains
            .iter()
            .any(|d| &d.project_id == project_id && d.primary)
            || self
                .store
                .domains_for_project(project_id)
                .await?
                .iter()
                .any(|d| d.primary);

        let hostname = self.domains.hostname(project_id, &service.name);
        let mut domain = Domain::internal(project_id, &service.name, service.port, &hostname);
        domain.primary = !has_primary && self.domains.is_primary_service(&service.name);

        info!(
            project_id = %project_id,
            service = %service.name,
            hostname = %hostname,
            primary = domain.primary,
            "Allocated internal domain"
        );

        uow.work_mut().domains.add(domain);
        uow.raise(
            project.key(),
            PlatformEvent::DomainsChanged {
                project_id: project_id.clone(),
            },
            &Timing::POST,
        );
        Ok(())
    }
}

/// Pushes the project's current domain bindings to its server
pub struct RefreshServerDomainsHandler {
    store: Arc<dyn PlatformStore>,
    hosting: Arc<dyn HostingApi>,
}

impl RefreshServerDomainsHandler {
    pub fn new(store: Arc<dyn PlatformStore>, hosting: Arc<dyn HostingApi>) -> Self {
        Self { store, hosting }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for RefreshServerDomainsHandler {
    fn name(&self) -> &'static str {
        "refresh_server_domains"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PostCommit
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn post_commit(&self, event: &PlatformEvent, committed: &ChangeSet) -> Result<()> {
        let PlatformEvent::DomainsChanged { project_id } = event else {
            return Ok(());
        };

        let project = load_project(self.store.as_ref(), committed, project_id).await?;
        let Some(server_id) = project.server_id.as_deref() else {
            debug!(project_id = %project_id, "No server to refresh domains on");
            return Ok(());
        };
        let server = load_server(self.store.as_ref(), committed, server_id).await?;

        let domains = self
            .store
            .domains_for_project(project_id)
            .await?
            .into_iter()
            .map(|d| DomainBinding {
                hostname: d.hostname,
                service_name: d.service_name,
                port: d.port,
                primary: d.primary,
            })
            .collect::<Vec<_>>();

        let request = DomainRefreshRequest {
            project_id: project_id.clone(),
            domains,
        };
        self.hosting.refresh_domains(&server.target(), &request).await?;
        debug!(project_id = %project_id, server_id = %server_id, "Server domains refreshed");
        Ok(())
    }
}
