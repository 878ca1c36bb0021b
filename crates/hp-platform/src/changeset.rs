//! In-flight entity graph of one unit of work

use std::fmt;

use hp_events::PendingWrite;

use crate::domain::{Deployment, Domain, Entity, Project, ProjectEnvironment, Server};
use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Modified,
}

/// Pending writes for one entity type, in insertion order
#[derive(Debug, Clone)]
pub struct EntitySet<T> {
    entries: Vec<(T, Change)>,
}

impl<T> Default for EntitySet<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T: Entity> EntitySet<T> {
    /// Track a new entity. Re-adding the same id replaces the pending value.
    pub fn add(&mut self, entity: T) {
        match self.position(entity.id()) {
            Some(i) => self.entries[i].0 = entity,
            None => self.entries.push((entity, Change::Added)),
        }
    }

    /// Track an update of a stored entity. The entity's `version` must be the
    /// version that was read.
    pub fn modify(&mut self, entity: T) {
        match self.position(entity.id()) {
            Some(i) => self.entries[i].0 = entity,
            None => self.entries.push((entity, Change::Modified)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|i| &self.entries[i].0)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        match self.position(id) {
            Some(i) => Some(&mut self.entries[i].0),
            None => None,
        }
    }

    pub fn change_of(&self, id: &str) -> Option<Change> {
        self.position(id).map(|i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(e, _)| e)
    }

    pub fn entries(&self) -> &[(T, Change)] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [(T, Change)] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|(e, _)| e.id() == id)
    }
}

/// Everything a unit of work will write, committed atomically
#[derive(Default)]
pub struct ChangeSet {
    pub projects: EntitySet<Project>,
    pub servers: EntitySet<Server>,
    pub domains: EntitySet<Domain>,
    pub environments: EntitySet<ProjectEnvironment>,
    pub deployments: EntitySet<Deployment>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.servers.is_empty()
            && self.domains.is_empty()
            && self.environments.is_empty()
            && self.deployments.is_empty()
    }

    pub fn total_writes(&self) -> usize {
        self.projects.len()
            + self.servers.len()
            + self.domains.len()
            + self.environments.len()
            + self.deployments.len()
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("projects", &self.projects.len())
            .field("servers", &self.servers.len())
            .field("domains", &self.domains.len())
            .field("environments", &self.environments.len())
            .field("deployments", &self.deployments.len())
            .finish()
    }
}

impl PendingWrite for ChangeSet {
    type Error = PlatformError;
}
