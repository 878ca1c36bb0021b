//! Server slot and internal domain allocation

use std::sync::Arc;

use hp_config::{DomainConfig, HostingConfig};
use hp_hosting::generate_signing_key;
use hp_secrets::KeyBytes;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::changeset::{Change, ChangeSet};
use crate::domain::{Project, Server};
use crate::error::Result;
use crate::repository::PlatformStore;

const HASH_LEN: usize = 8;
const MAX_LABEL_LEN: usize = 63;
const SECONDARY_LABEL: &str = "api";

/// First 8 lowercase hex chars of SHA-256 over the project id
pub fn domain_hash(project_id: &str) -> String {
    let digest = Sha256::digest(project_id.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}

/// `[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?`
pub fn is_dns_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_LABEL_LEN
                && *first != b'-'
                && *last != b'-'
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

/// Derives internal hostnames. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct DomainAllocator {
    suffix: String,
    primary_service: String,
    secondary_service: String,
}

impl DomainAllocator {
    pub fn new(
        suffix: impl Into<String>,
        primary_service: impl Into<String>,
        secondary_service: impl Into<String>,
    ) -> Self {
        Self {
            suffix: suffix.into(),
            primary_service: primary_service.into(),
            secondary_service: secondary_service.into(),
        }
    }

    pub fn from_config(config: &DomainConfig) -> Self {
        Self::new(&config.suffix, &config.primary_service, &config.secondary_service)
    }

    /// `{service}.{hash}.{suffix}`, or `api.{hash}.{suffix}` for the
    /// secondary service
    pub fn hostname(&self, project_id: &str, service_name: &str) -> String {
        let hash = domain_hash(project_id);
        if service_name.eq_ignore_ascii_case(&self.secondary_service) {
            format!("{}.{}.{}", SECONDARY_LABEL, hash, self.suffix)
        } else {
            format!("{}.{}.{}", service_name.to_ascii_lowercase(), hash, self.suffix)
        }
    }

    /// Service names become the first hostname label, case-insensitively.
    /// `api` belongs to the secondary service.
    pub fn check_service_name(&self, service_name: &str) -> std::result::Result<(), String> {
        let label = service_name.to_ascii_lowercase();
        if !is_dns_label(&label) {
            return Err(format!(
                "service name '{}' must be a DNS label of at most {} letters, digits or inner hyphens",
                service_name, MAX_LABEL_LEN
            ));
        }
        if label == SECONDARY_LABEL && !service_name.eq_ignore_ascii_case(&self.secondary_service) {
            return Err(format!("service name '{}' is reserved", service_name));
        }
        Ok(())
    }

    pub fn is_primary_service(&self, service_name: &str) -> bool {
        service_name.eq_ignore_ascii_case(&self.primary_service)
    }
}

/// Outcome of a server allocation
pub struct Allocation {
    pub server: Server,
    /// `Added` for a newly provisioned server, `Modified` for a pooled one
    pub change: Change,
    /// Signing key seed of a newly provisioned server
    pub secret: Option<KeyBytes>,
}

/// Pool-check-then-create server allocation
#[derive(Clone)]
pub struct ServerAllocator {
    store: Arc<dyn PlatformStore>,
    hosting: HostingConfig,
}

impl ServerAllocator {
    pub fn new(store: Arc<dyn PlatformStore>, hosting: HostingConfig) -> Self {
        Self { store, hosting }
    }

    /// Pick a free server in the project's location, or provision a new one
    /// with a fresh signing key. The returned server is already assigned to
    /// the project.
    pub async fn allocate(&self, project: &Project, pending: &ChangeSet) -> Result<Allocation> {
        let free = self.store.find_free_servers(&project.location).await?;
        let unclaimed = free.into_iter().find(|server| {
            pending
                .servers
                .get(&server.id)
                .map(|s| s.is_free())
                .unwrap_or(true)
        });
        if let Some(mut server) = unclaimed {
            info!(server_id = %server.id, project_id = %project.id, "Allocated pooled server");
            server.project_id = Some(project.id.clone());
            return Ok(Allocation {
                server,
                change: Change::Modified,
                secret: None,
            });
        }

        let server_id = format!("srv-{}", uuid::Uuid::new_v4().simple());
        let key = generate_signing_key();
        let address = self.hosting.server_address(&server_id, &project.location);

        let mut server = Server::new(&server_id, &project.location, address, key.public_key);
        server.project_id = Some(project.id.clone());

        info!(server_id = %server_id, project_id = %project.id, location = %project.location, "Provisioned new server");

        Ok(Allocation {
            server,
            change: Change::Added,
            secret: Some(key.secret),
        })
    }
}
