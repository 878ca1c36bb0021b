//! Domain entities

mod deployment;
mod environment;
mod hostname;
mod project;
mod server;

pub use deployment::{CommitInfo, Deployment, DeploymentStatus, StatusChange};
pub use environment::ProjectEnvironment;
pub use hostname::{Domain, DomainKind};
pub use project::{validate_repository, Project, ProjectService, ProjectState, ServiceProtocol, ServiceTier};
pub use server::Server;

use hp_events::EntityKey;

/// A persisted entity with an id and an optimistic-concurrency version.
///
/// `version` is 0 until the entity is first committed; every committed
/// write bumps it by one.
pub trait Entity: Clone + Send + Sync + 'static {
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &str;

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);

    fn key(&self) -> EntityKey {
        EntityKey::new(Self::ENTITY_TYPE, self.id())
    }
}

/// Implement [`Entity`] for a struct with `id: String` and `version: u64`
macro_rules! impl_entity {
    ($ty:ty, $name:literal) => {
        impl $crate::domain::Entity for $ty {
            const ENTITY_TYPE: &'static str = $name;

            fn id(&self) -> &str {
                &self.id
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

pub(crate) use impl_entity;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
