use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{impl_entity, new_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainKind {
    /// Generated under the platform suffix
    Internal,
    /// Supplied by the user, needs verification
    External,
}

/// A hostname bound to a project service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub project_id: String,
    pub service_name: String,
    pub port: u16,
    pub hostname: String,
    pub kind: DomainKind,
    pub verified: bool,
    pub primary: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl_entity!(Domain, "domain");

impl Domain {
    pub fn internal(
        project_id: impl Into<String>,
        service_name: impl Into<String>,
        port: u16,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            service_name: service_name.into(),
            port,
            hostname: hostname.into(),
            kind: DomainKind::Internal,
            verified: true,
            primary: false,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn external(
        project_id: impl Into<String>,
        service_name: impl Into<String>,
        port: u16,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            kind: DomainKind::External,
            verified: false,
            ..Self::internal(project_id, service_name, port, hostname)
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind == DomainKind::Internal
    }

    /// Whether this is the internal domain for `(project, service, port)`
    pub fn is_internal_for(&self, project_id: &str, service_name: &str, port: u16) -> bool {
        self.is_internal()
            && self.project_id == project_id
            && self.port == port
            && self.service_name.eq_ignore_ascii_case(service_name)
    }
}
