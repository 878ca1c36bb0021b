//! Repositories
//!
//! [`PlatformStore`] is the persistence seam: lookups by id, a handful of
//! queries used by handlers and the dispatcher, and an atomic commit of a
//! whole [`ChangeSet`].

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use hp_events::Committer;

use crate::changeset::ChangeSet;
use crate::domain::{Deployment, DeploymentStatus, Domain, Project, ProjectEnvironment, Server};
use crate::error::{PlatformError, Result};

#[async_trait]
pub trait PlatformStore: Send + Sync {
    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn get_server(&self, id: &str) -> Result<Option<Server>>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    /// Unassigned servers in `location`, oldest first
    async fn find_free_servers(&self, location: &str) -> Result<Vec<Server>>;

    async fn find_internal_domain(
        &self,
        project_id: &str,
        service_name: &str,
        port: u16,
    ) -> Result<Option<Domain>>;

    async fn domains_for_project(&self, project_id: &str) -> Result<Vec<Domain>>;

    async fn environments_for_project(&self, project_id: &str) -> Result<Vec<ProjectEnvironment>>;

    /// Queued or deploying deployment of this project for this commit
    async fn find_in_flight_deployment(&self, project_id: &str, commit_hash: &str) -> Result<Option<Deployment>>;

    async fn find_deployments_in_status(&self, status: DeploymentStatus) -> Result<Vec<Deployment>>;

    /// Persist every pending write or none of them.
    ///
    /// Checks optimistic versions and cross-entity constraints, then stamps
    /// the committed versions back onto `changes`.
    async fn commit_changes(&self, changes: &mut ChangeSet) -> Result<()>;
}

#[async_trait]
impl Committer<ChangeSet> for dyn PlatformStore {
    async fn commit(&self, work: &mut ChangeSet) -> std::result::Result<(), PlatformError> {
        self.commit_changes(work).await
    }
}
