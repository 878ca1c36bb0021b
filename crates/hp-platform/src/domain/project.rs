use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{impl_entity, new_id};

/// Lifecycle state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectState {
    Stopped,
    Starting,
    Running,
    Deleting,
    Unknown,
}

impl ProjectState {
    /// Every state except `Stopped` and `Deleting` needs an assigned server
    pub fn requires_server(&self) -> bool {
        !matches!(self, ProjectState::Stopped | ProjectState::Deleting)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceTier {
    #[default]
    Free,
    Hobby,
    Pro,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTier::Free => "FREE",
            ServiceTier::Hobby => "HOBBY",
            ServiceTier::Pro => "PRO",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceProtocol {
    #[default]
    Http,
    Tcp,
    Udp,
}

/// A service a project exposes on its server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectService {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ServiceProtocol,
}

impl ProjectService {
    pub fn http(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: ServiceProtocol::Http,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// `org/repo`
    pub repository: String,
    pub location: String,
    pub server_id: Option<String>,
    pub state: ProjectState,
    pub tier: ServiceTier,
    pub services: Vec<ProjectService>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_entity!(Project, "project");

impl Project {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        repository: impl Into<String>,
        location: impl Into<String>,
        tier: ServiceTier,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.into(),
            name: name.into(),
            repository: repository.into(),
            location: location.into(),
            server_id: None,
            state: ProjectState::Starting,
            tier,
            services: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Repository name without the organisation
    pub fn repo_name(&self) -> &str {
        self.repository
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.repository)
    }

    pub fn find_service(&self, name: &str) -> Option<&ProjectService> {
        self.services.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Add or update a service by name. Returns true when anything changed.
    pub fn upsert_service(&mut self, service: ProjectService) -> bool {
        match self
            .services
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(&service.name))
        {
            Some(existing) if existing.port == service.port && existing.protocol == service.protocol => false,
            Some(existing) => {
                *existing = service;
                self.touch();
                true
            }
            None => {
                self.services.push(service);
                self.touch();
                true
            }
        }
    }

    pub fn assign_server(&mut self, server_id: impl Into<String>) {
        self.server_id = Some(server_id.into());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Validate an `org/repo` locator
pub fn validate_repository(repository: &str) -> Result<(), String> {
    let Some((org, repo)) = repository.split_once('/') else {
        return Err(format!("repository '{}' must be of the form org/repo", repository));
    };

    let valid_part = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid_part(org) || !valid_part(repo) {
        return Err(format!("repository '{}' must be of the form org/repo", repository));
    }
    Ok(())
}
