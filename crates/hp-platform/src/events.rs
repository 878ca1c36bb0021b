//! Platform domain events
//!
//! Entity events are raised on the unit of work with an [`EntityKey`];
//! `ProjectProvisioned` and `DeploymentFinished` are notifications and only
//! ever fire after commit.

use hp_events::{DomainEvent, EntityKey, EventHandler, HandlerRegistry, Interceptor, UnitOfWork};

use crate::changeset::ChangeSet;
use crate::domain::{DeploymentStatus, ProjectService};

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// A project row was added
    ProjectCreated { project_id: String },

    /// The hosting server reported the services a project exposes
    ServicesDiscovered {
        project_id: String,
        services: Vec<ProjectService>,
    },

    /// An internal domain should exist for this service
    DomainRequested {
        project_id: String,
        service_name: String,
        port: u16,
    },

    /// The set of domains of a project changed
    DomainsChanged { project_id: String },

    /// A deployment row was added in `Queued`
    DeploymentQueued { deployment_id: String },

    DeploymentStatusChanged {
        deployment_id: String,
        project_id: String,
        status: DeploymentStatus,
    },

    /// Notification: creation transaction committed
    ProjectProvisioned { project_id: String, owner_id: String },

    /// Notification: a deployment reached a terminal status
    DeploymentFinished {
        deployment_id: String,
        project_id: String,
        status: DeploymentStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformEventKind {
    ProjectCreated,
    ServicesDiscovered,
    DomainRequested,
    DomainsChanged,
    DeploymentQueued,
    DeploymentStatusChanged,
    ProjectProvisioned,
    DeploymentFinished,
}

impl DomainEvent for PlatformEvent {
    type Kind = PlatformEventKind;

    fn kind(&self) -> PlatformEventKind {
        match self {
            PlatformEvent::ProjectCreated { .. } => PlatformEventKind::ProjectCreated,
            PlatformEvent::ServicesDiscovered { .. } => PlatformEventKind::ServicesDiscovered,
            PlatformEvent::DomainRequested { .. } => PlatformEventKind::DomainRequested,
            PlatformEvent::DomainsChanged { .. } => PlatformEventKind::DomainsChanged,
            PlatformEvent::DeploymentQueued { .. } => PlatformEventKind::DeploymentQueued,
            PlatformEvent::DeploymentStatusChanged { .. } => PlatformEventKind::DeploymentStatusChanged,
            PlatformEvent::ProjectProvisioned { .. } => PlatformEventKind::ProjectProvisioned,
            PlatformEvent::DeploymentFinished { .. } => PlatformEventKind::DeploymentFinished,
        }
    }
}

/// Entity key of a project service, used to deduplicate domain requests
pub fn service_key(project_id: &str, service_name: &str, port: u16) -> EntityKey {
    EntityKey::new(
        "service",
        format!("{}/{}/{}", project_id, service_name.to_ascii_lowercase(), port),
    )
}

pub type PlatformUnitOfWork = UnitOfWork<PlatformEvent, ChangeSet>;
pub type PlatformInterceptor = Interceptor<PlatformEvent, ChangeSet>;
pub type PlatformRegistry = HandlerRegistry<PlatformEvent, ChangeSet>;
pub type PlatformHandler = dyn EventHandler<PlatformEvent, ChangeSet>;
