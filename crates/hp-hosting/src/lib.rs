//! HostPilot Hosting RPC
//!
//! Signed HTTP client for the per-tenant hosting daemons. Every request body
//! is signed with the Ed25519 key belonging to the target server and the
//! base64 signature is sent in the `x-signature` header.

use async_trait::async_trait;
use hp_common::ServerUsage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;
mod signing;

pub use client::{HostingClient, HostingClientConfig};
pub use signing::{generate_signing_key, verify_signature, GeneratedKey, RequestSigner, SIGNATURE_HEADER};

#[derive(Error, Debug)]
pub enum HostingError {
    #[error("Hosting server {server_id} returned {status}: {body}")]
    Status {
        server_id: String,
        status: u16,
        body: String,
    },

    #[error("Request to hosting server {0} timed out")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stored signing key for server {0} does not match its recorded public key")]
    KeyMismatch(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Key store error: {0}")]
    Secrets(#[from] hp_secrets::SecretsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, HostingError>;

/// Where and how to reach one hosting server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub server_id: String,
    pub base_address: String,
    /// Base64 Ed25519 public key recorded for this server
    pub public_key: String,
}

/// Body of `POST /projects/deploy`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub project_id: String,
    pub access_token: String,
    pub repo_name: String,
    pub commit_hash: String,
    pub deployment_id: String,
}

/// Body of `POST /domains/refresh`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainRefreshRequest {
    pub project_id: String,
    pub domains: Vec<DomainBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainBinding {
    pub hostname: String,
    pub service_name: String,
    pub port: u16,
    pub primary: bool,
}

/// Operations the control plane invokes on a hosting server
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// `GET /`
    async fn health(&self, target: &ServerTarget) -> Result<()>;

    /// `POST /projects/deploy`
    async fn deploy(&self, target: &ServerTarget, request: &DeployRequest) -> Result<()>;

    /// `POST /domains/refresh`
    async fn refresh_domains(&self, target: &ServerTarget, request: &DomainRefreshRequest) -> Result<()>;

    /// `GET /usage`
    async fn usage(&self, target: &ServerTarget) -> Result<ServerUsage>;
}
