use chrono::{DateTime, Utc};
use hp_common::ServerUsage;
use hp_hosting::ServerTarget;
use serde::{Deserialize, Serialize};

use super::impl_entity;

/// A hosting node. Its id doubles as the key id of its signing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub location: String,
    pub base_address: String,
    /// Base64 Ed25519 public key
    pub public_key: String,
    /// Project occupying this slot, `None` when free
    pub project_id: Option<String>,
    pub usage: Option<ServerUsage>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_entity!(Server, "server");

impl Server {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        base_address: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            location: location.into(),
            base_address: base_address.into(),
            public_key: public_key.into(),
            project_id: None,
            usage: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_free(&self) -> bool {
        self.project_id.is_none()
    }

    pub fn target(&self) -> ServerTarget {
        ServerTarget {
            server_id: self.id.clone(),
            base_address: self.base_address.clone(),
            public_key: self.public_key.clone(),
        }
    }

    pub fn record_usage(&mut self, mut usage: ServerUsage) {
        let now = Utc::now();
        usage.sampled_at.get_or_insert(now);
        self.usage = Some(usage);
        self.updated_at = now;
    }
}
