//! In-process store
//!
//! Commits validate against a staged copy of the tables and swap it in only
//! when every check passes, so a failed commit leaves no partial writes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::PlatformStore;
use crate::changeset::{Change, ChangeSet, EntitySet};
use crate::domain::{Deployment, DeploymentStatus, Domain, Entity, Project, ProjectEnvironment, Server};
use crate::error::{PlatformError, Result};

#[derive(Clone, Default)]
struct Tables {
    projects: HashMap<String, Project>,
    servers: HashMap<String, Server>,
    domains: HashMap<String, Domain>,
    environments: HashMap<String, ProjectEnvironment>,
    deployments: HashMap<String, Deployment>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a server directly, e.g. to pre-populate the free pool
    pub fn seed_server(&self, mut server: Server) {
        server.version = server.version.max(1);
        self.tables.write().servers.insert(server.id.clone(), server);
    }

    pub fn project_count(&self) -> usize {
        self.tables.read().projects.len()
    }

    pub fn server_count(&self) -> usize {
        self.tables.read().servers.len()
    }

    pub fn domain_count(&self) -> usize {
        self.tables.read().domains.len()
    }

    pub fn environment_count(&self) -> usize {
        self.tables.read().environments.len()
    }

    pub fn deployment_count(&self) -> usize {
        self.tables.read().deployments.len()
    }
}

fn next_version<T: Entity>(entity: &T, change: Change) -> u64 {
    match change {
        Change::Added => 1,
        Change::Modified => entity.version() + 1,
    }
}

fn check_versions<T: Entity>(table: &HashMap<String, T>, set: &EntitySet<T>) -> Result<()> {
    for (entity, change) in set.entries() {
        match (change, table.get(entity.id())) {
            (Change::Added, Some(_)) => {
                return Err(PlatformError::duplicate(T::ENTITY_TYPE, "id", entity.id()));
            }
            (Change::Modified, None) => {
                return Err(PlatformError::not_found(T::ENTITY_TYPE, entity.id()));
            }
            (Change::Modified, Some(stored)) if stored.version() != entity.version() => {
                return Err(PlatformError::ConcurrencyConflict {
                    entity_type: T::ENTITY_TYPE.to_string(),
                    id: entity.id().to_string(),
                    expected: entity.version(),
                    actual: stored.version(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply<T: Entity>(table: &mut HashMap<String, T>, set: &EntitySet<T>) {
    for (entity, change) in set.entries() {
        let mut row = entity.clone();
        row.set_version(next_version(entity, *change));
        table.insert(row.id().to_string(), row);
    }
}

fn stamp<T: Entity>(set: &mut EntitySet<T>) {
    for (entity, change) in set.entries_mut() {
        let version = next_version(entity, *change);
        entity.set_version(version);
    }
}

/// Cross-entity constraints, evaluated on the staged tables for the rows
/// this change set touches.
fn check_constraints(staged: &Tables, changes: &ChangeSet) -> Result<()> {
    for project in changes.projects.iter() {
        match &project.server_id {
            None if project.state.requires_server() => {
                return Err(PlatformError::constraint(format!(
                    "project {} in state {:?} has no server",
                    project.id, project.state
                )));
            }
            Some(server_id) => {
                if !staged.servers.contains_key(server_id) {
                    return Err(PlatformError::constraint(format!(
                        "project {} references unknown server {}",
                        project.id, server_id
                    )));
                }
                let occupants = staged
                    .projects
                    .values()
                    .filter(|p| p.server_id.as_deref() == Some(server_id.as_str()))
                    .count();
                if occupants > 1 {
                    return Err(PlatformError::constraint(format!(
                        "server {} is assigned to more than one project",
                        server_id
                    )));
                }
            }
            None => {}
        }
    }

    let mut touched_projects: HashSet<&str> = HashSet::new();
    for domain in changes.domains.iter() {
        touched_projects.insert(domain.project_id.as_str());

        let same_host = staged
            .domains
            .values()
            .filter(|d| d.hostname.eq_ignore_ascii_case(&domain.hostname))
            .count();
        if same_host > 1 {
            return Err(PlatformError::duplicate("domain", "hostname", &domain.hostname));
        }

        if domain.is_internal() {
            let same_service = staged
                .domains
                .values()
                .filter(|d| d.is_internal_for(&domain.project_id, &domain.service_name, domain.port))
                .count();
            if same_service > 1 {
                return Err(PlatformError::duplicate(
                    "domain",
                    "service",
                    format!("{}/{}/{}", domain.project_id, domain.service_name, domain.port),
                ));
            }
        }
    }
    for project_id in touched_projects {
        let primaries = staged
            .domains
            .values()
            .filter(|d| d.project_id == project_id && d.primary)
            .count();
        if primaries > 1 {
            return Err(PlatformError::constraint(format!(
                "project {} has more than one primary domain",
                project_id
            )));
        }
    }

    for env in changes.environments.iter() {
        let same_branch = staged
            .environments
            .values()
            .filter(|e| e.project_id == env.project_id && e.branch == env.branch)
            .count();
        if same_branch > 1 {
            return Err(PlatformError::duplicate(
                "environment",
                "branch",
                format!("{}/{}", env.project_id, env.branch),
            ));
        }
    }

    for deployment in changes.deployments.iter() {
        if !deployment.status.is_in_flight() {
            continue;
        }
        let in_flight = staged
            .deployments
            .values()
            .filter(|d| {
                d.project_id == deployment.project_id
                    && d.commit.hash == deployment.commit.hash
                    && d.status.is_in_flight()
            })
            .count();
        if in_flight > 1 {
            return Err(PlatformError::duplicate("deployment", "commit", &deployment.commit.hash));
        }
    }

    Ok(())
}

#[async_trait]
impl PlatformStore for MemoryStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.tables.read().projects.get(id).cloned())
    }

    async fn get_server(&self, id: &str) -> Result<Option<Server>> {
        Ok(self.tables.read().servers.get(id).cloned())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>> {
        Ok(self.tables.read().deployments.get(id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let mut servers: Vec<Server> = self.tables.read().servers.values().cloned().collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(servers)
    }

    async fn find_free_servers(&self, location: &str) -> Result<Vec<Server>> {
        let mut servers: Vec<Server> = self
            .tables
            .read()
            .servers
            .values()
            .filter(|s| s.is_free() && s.location == location)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(servers)
    }

    async fn find_internal_domain(
        &self,
        project_id: &str,
        service_name: &str,
        port: u16,
    ) -> Result<Option<Domain>> {
        Ok(self
            .tables
            .read()
            .domains
            .values()
            .find(|d| d.is_internal_for(project_id, service_name, port))
            .cloned())
    }

    async fn domains_for_project(&self, project_id: &str) -> Result<Vec<Domain>> {
        let mut domains: Vec<Domain> = self
            .tables
            .read()
            .domains
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        domains.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.hostname.cmp(&b.hostname)));
        Ok(domains)
    }

    async fn environments_for_project(&self, project_id: &str) -> Result<Vec<ProjectEnvironment>> {
        Ok(self
            .tables
            .read()
            .environments
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_in_flight_deployment(&self, project_id: &str, commit_hash: &str) -> Result<Option<Deployment>> {
        Ok(self
            .tables
            .read()
            .deployments
            .values()
            .find(|d| d.project_id == project_id && d.commit.hash == commit_hash && d.status.is_in_flight())
            .cloned())
    }

    async fn find_deployments_in_status(&self, status: DeploymentStatus) -> Result<Vec<Deployment>> {
        Ok(self
            .tables
            .read()
            .deployments
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn commit_changes(&self, changes: &mut ChangeSet) -> Result<()> {
        let mut tables = self.tables.write();

        check_versions(&tables.projects, &changes.projects)?;
        check_versions(&tables.servers, &changes.servers)?;
        check_versions(&tables.domains, &changes.domains)?;
        check_versions(&tables.environments, &changes.environments)?;
        check_versions(&tables.deployments, &changes.deployments)?;

        let mut staged = tables.clone();
        apply(&mut staged.projects, &changes.projects);
        apply(&mut staged.servers, &changes.servers);
        apply(&mut staged.domains, &changes.domains);
        apply(&mut staged.environments, &changes.environments);
        apply(&mut staged.deployments, &changes.deployments);

        check_constraints(&staged, changes)?;

        *tables = staged;
        drop(tables);

        stamp(&mut changes.projects);
        stamp(&mut changes.servers);
        stamp(&mut changes.domains);
        stamp(&mut changes.environments);
        stamp(&mut changes.deployments);

        debug!(writes = changes.total_writes(), "Committed change set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommitInfo, ProjectState, ServiceTier};

    fn server(id: &str) -> Server {
        Server::new(id, "eu-central", format!("https://{}.test", id), "pk")
    }

    fn project_on(server_id: &str) -> Project {
        let mut project = Project::new("u1", "Shop", "acme/shop", "eu-central", ServiceTier::Free);
        project.assign_server(server_id);
        project
    }

    #[tokio::test]
    async fn test_commit_stamps_versions() {
        let store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.servers.add(server("s1"));
        changes.projects.add(project_on("s1"));

        store.commit_changes(&mut changes).await.unwrap();
        let project = changes.projects.iter().next().unwrap().clone();
        assert_eq!(project.version, 1);

        let mut update = ChangeSet::new();
        let mut renamed = project.clone();
        renamed.name = "Renamed".into();
        update.projects.modify(renamed);
        store.commit_changes(&mut update).await.unwrap();

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.name, "Renamed");
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        store.seed_server(server("s1"));
        let stale = store.get_server("s1").await.unwrap().unwrap();

        let mut first = ChangeSet::new();
        first.servers.modify(stale.clone());
        store.commit_changes(&mut first).await.unwrap();

        let mut second = ChangeSet::new();
        second.servers.modify(stale);
        let err = store.commit_changes(&mut second).await.unwrap_err();
        assert!(matches!(err, PlatformError::ConcurrencyConflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_failed_constraint_writes_nothing() {
        let store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.servers.add(server("s1"));
        let mut project = Project::new("u1", "Shop", "acme/shop", "eu-central", ServiceTier::Free);
        project.state = ProjectState::Running;
        changes.projects.add(project);

        let err = store.commit_changes(&mut changes).await.unwrap_err();
        assert!(matches!(err, PlatformError::Constraint { .. }));
        assert_eq!(store.server_count(), 0);
        assert_eq!(store.project_count(), 0);
    }

    #[tokio::test]
    async fn test_stopped_project_needs_no_server() {
        let store = MemoryStore::new();
        let mut project = Project::new("u1", "Shop", "acme/shop", "eu-central", ServiceTier::Free);
        project.state = ProjectState::Stopped;
        let mut changes = ChangeSet::new();
        changes.projects.add(project);
        store.commit_changes(&mut changes).await.unwrap();
    }

    #[tokio::test]
    async fn test_internal_domain_unique_per_service() {
        let store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.domains.add(Domain::internal("p1", "frontend", 3000, "frontend.a.test"));
        changes.domains.add(Domain::internal("p1", "Frontend", 3000, "frontend.b.test"));

        let err = store.commit_changes(&mut changes).await.unwrap_err();
        assert!(matches!(err, PlatformError::Duplicate { .. }));
        assert_eq!(store.domain_count(), 0);
    }

    #[tokio::test]
    async fn test_single_primary_domain() {
        let store = MemoryStore::new();
        let mut a = Domain::internal("p1", "frontend", 3000, "frontend.a.test");
        a.primary = true;
        let mut b = Domain::external("p1", "frontend", 3000, "shop.example.com");
        b.primary = true;

        let mut changes = ChangeSet::new();
        changes.domains.add(a);
        store.commit_changes(&mut changes).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.domains.add(b);
        let err = store.commit_changes(&mut changes).await.unwrap_err();
        assert!(matches!(err, PlatformError::Constraint { .. }));
    }

    #[tokio::test]
    async fn test_one_in_flight_deployment_per_commit() {
        let store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.deployments.add(Deployment::queue("p1", None, CommitInfo::new("abc")));
        store.commit_changes(&mut changes).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.deployments.add(Deployment::queue("p1", None, CommitInfo::new("abc")));
        let err = store.commit_changes(&mut changes).await.unwrap_err();
        assert!(matches!(err, PlatformError::Duplicate { .. }));

        let mut changes = ChangeSet::new();
        changes.deployments.add(Deployment::queue("p1", None, CommitInfo::new("def")));
        store.commit_changes(&mut changes).await.unwrap();
        assert_eq!(store.deployment_count(), 2);
    }

    #[tokio::test]
    async fn test_find_free_servers_by_location() {
        let store = MemoryStore::new();
        store.seed_server(server("s1"));
        let mut taken = server("s2");
        taken.project_id = Some("p9".into());
        store.seed_server(taken);

        store.seed_server(server("s3"));

        let free: Vec<String> = store
            .find_free_servers("eu-central")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(free, vec!["s1", "s3"]);
        assert!(store.find_free_servers("us-east").await.unwrap().is_empty());
    }
}
