use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{impl_entity, new_id};

/// Branch-scoped environment variables and deploy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEnvironment {
    pub id: String,
    pub project_id: String,
    pub branch: String,
    pub variables: BTreeMap<String, String>,
    pub auto_deploy: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl_entity!(ProjectEnvironment, "environment");

impl ProjectEnvironment {
    pub fn new(project_id: impl Into<String>, branch: impl Into<String>, auto_deploy: bool) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            branch: branch.into(),
            variables: BTreeMap::new(),
            auto_deploy,
            version: 0,
            created_at: Utc::now(),
        }
    }
}
