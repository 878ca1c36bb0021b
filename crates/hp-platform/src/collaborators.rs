//! External collaborators
//!
//! Interfaces to systems the control plane talks to but does not own, plus
//! simple in-process implementations used by the development binary.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::domain::ServiceTier;
use crate::error::Result;

/// Source-control access tokens by user
#[async_trait]
pub trait SourceControlTokens: Send + Sync {
    async fn access_token(&self, user_id: &str) -> Result<Option<String>>;
}

/// Subscription create-or-update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpsert {
    pub project_id: String,
    pub owner_id: String,
    pub tier: ServiceTier,
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn upsert_subscription(&self, request: &SubscriptionUpsert) -> Result<()>;
}

/// Build log object storage keyed by deployment id
#[async_trait]
pub trait BuildLogStore: Send + Sync {
    async fn upload(&self, deployment_id: &str, contents: String) -> Result<()>;

    async fn download(&self, deployment_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient_id: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

// ============================================================================
// In-process implementations
// ============================================================================

/// Tokens configured up front, with an optional fallback for every user
#[derive(Default)]
pub struct StaticTokens {
    tokens: DashMap<String, String>,
    fallback: Option<String>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(token: impl Into<String>) -> Self {
        Self {
            tokens: DashMap::new(),
            fallback: Some(token.into()),
        }
    }

    pub fn insert(&self, user_id: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(user_id.into(), token.into());
    }
}

#[async_trait]
impl SourceControlTokens for StaticTokens {
    async fn access_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .tokens
            .get(user_id)
            .map(|t| t.value().clone())
            .or_else(|| self.fallback.clone()))
    }
}

/// Billing stand-in that only records upserts
#[derive(Default)]
pub struct LoggingBilling {
    upserts: AtomicUsize,
}

impl LoggingBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BillingService for LoggingBilling {
    async fn upsert_subscription(&self, request: &SubscriptionUpsert) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        info!(
            project_id = %request.project_id,
            owner_id = %request.owner_id,
            tier = request.tier.as_str(),
            "Subscription upserted"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBuildLogStore {
    logs: DashMap<String, String>,
}

impl MemoryBuildLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildLogStore for MemoryBuildLogStore {
    async fn upload(&self, deployment_id: &str, contents: String) -> Result<()> {
        self.logs.insert(deployment_id.to_string(), contents);
        Ok(())
    }

    async fn download(&self, deployment_id: &str) -> Result<Option<String>> {
        Ok(self.logs.get(deployment_id).map(|l| l.value().clone()))
    }
}

/// Notifier that writes to the log
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            recipient = %notification.recipient_id,
            subject = %notification.subject,
            "Notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens_fallback() {
        let tokens = StaticTokens::with_fallback("shared");
        tokens.insert("u1", "personal");

        assert_eq!(tokens.access_token("u1").await.unwrap().as_deref(), Some("personal"));
        assert_eq!(tokens.access_token("u2").await.unwrap().as_deref(), Some("shared"));
        assert_eq!(StaticTokens::new().access_token("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_build_logs() {
        let logs = MemoryBuildLogStore::new();
        assert_eq!(logs.download("d1").await.unwrap(), None);
        logs.upload("d1", "line".into()).await.unwrap();
        assert_eq!(logs.download("d1").await.unwrap().as_deref(), Some("line"));
    }
}
