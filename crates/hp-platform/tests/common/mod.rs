//! Shared fixtures for platform integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hp_common::ServerUsage;
use hp_config::{ControlPlaneConfig, DispatchMode};
use hp_events::{cancel_pair, CancelHandle};
use hp_hosting::{DeployRequest, DomainRefreshRequest, HostingApi, HostingError, ServerTarget};
use hp_platform::collaborators::{
    BillingService, LoggingBilling, LoggingNotifier, MemoryBuildLogStore, SourceControlTokens, StaticTokens,
    SubscriptionUpsert,
};
use hp_platform::operations::{CreateProjectCommand, ExecutionContext, ProvisionedProject};
use hp_platform::repository::MemoryStore;
use hp_platform::{Platform, PlatformDeps, PlatformError};
use hp_secrets::{KeyBytes, KeyStore, MemoryKeyStore, SecretsError};
use parking_lot::Mutex;
use tokio::sync::Notify;

pub const OWNER: &str = "user-1";

#[derive(Debug, Clone, PartialEq)]
pub enum HostingCall {
    Health(String),
    Deploy(String, DeployRequest),
    RefreshDomains(String, DomainRefreshRequest),
    Usage(String),
}

/// Records every call. Deploys can be made to fail or to block until
/// released.
#[derive(Default)]
pub struct MockHosting {
    calls: Mutex<Vec<HostingCall>>,
    fail_deploy: AtomicBool,
    block_deploy: AtomicBool,
    release: Notify,
}

impl MockHosting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deploys(&self) {
        self.fail_deploy.store(true, Ordering::SeqCst);
    }

    pub fn block_deploys(&self) {
        self.block_deploy.store(true, Ordering::SeqCst);
    }

    pub fn release_deploys(&self) {
        self.block_deploy.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn calls(&self) -> Vec<HostingCall> {
        self.calls.lock().clone()
    }

    pub fn deploy_calls(&self) -> Vec<DeployRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostingCall::Deploy(_, request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn refresh_calls(&self) -> Vec<DomainRefreshRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostingCall::RefreshDomains(_, request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn health_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HostingCall::Health(_)))
            .count()
    }
}

#[async_trait]
impl HostingApi for MockHosting {
    async fn health(&self, target: &ServerTarget) -> hp_hosting::Result<()> {
        self.calls.lock().push(HostingCall::Health(target.server_id.clone()));
        Ok(())
    }

    async fn deploy(&self, target: &ServerTarget, request: &DeployRequest) -> hp_hosting::Result<()> {
        self.calls
            .lock()
            .push(HostingCall::Deploy(target.server_id.clone(), request.clone()));

        let released = self.release.notified();
        if self.block_deploy.load(Ordering::SeqCst) {
            released.await;
        }
        if self.fail_deploy.load(Ordering::SeqCst) {
            return Err(HostingError::Status {
                server_id: target.server_id.clone(),
                status: 500,
                body: "build failed".into(),
            });
        }
        Ok(())
    }

    async fn refresh_domains(&self, target: &ServerTarget, request: &DomainRefreshRequest) -> hp_hosting::Result<()> {
        self.calls
            .lock()
            .push(HostingCall::RefreshDomains(target.server_id.clone(), request.clone()));
        Ok(())
    }

    async fn usage(&self, target: &ServerTarget) -> hp_hosting::Result<ServerUsage> {
        self.calls.lock().push(HostingCall::Usage(target.server_id.clone()));
        Ok(ServerUsage::default())
    }
}

/// Billing that is always down
#[derive(Default)]
pub struct FailingBilling {
    attempts: AtomicUsize,
}

impl FailingBilling {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingService for FailingBilling {
    async fn upsert_subscription(&self, _request: &SubscriptionUpsert) -> hp_platform::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PlatformError::upstream("billing unavailable"))
    }
}

/// Billing that answers only after a delay
pub struct SlowBilling {
    delay: Duration,
    upserts: AtomicUsize,
}

impl SlowBilling {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingService for SlowBilling {
    async fn upsert_subscription(&self, _request: &SubscriptionUpsert) -> hp_platform::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Key store whose writes always fail
#[derive(Default)]
pub struct FailingKeyStore {
    puts: AtomicUsize,
}

impl FailingKeyStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for FailingKeyStore {
    async fn get(&self, key_id: &str) -> hp_secrets::Result<KeyBytes> {
        Err(SecretsError::NotFound(key_id.to_string()))
    }

    async fn put(&self, _key_id: &str, _bytes: &[u8]) -> hp_secrets::Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(SecretsError::ProviderError("disk full".into()))
    }

    async fn delete(&self, _key_id: &str) -> hp_secrets::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Memory key store whose writes take a while
pub struct SlowKeyStore {
    delay: Duration,
    pub inner: MemoryKeyStore,
}

impl SlowKeyStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryKeyStore::new(),
        }
    }
}

#[async_trait]
impl KeyStore for SlowKeyStore {
    async fn get(&self, key_id: &str) -> hp_secrets::Result<KeyBytes> {
        self.inner.get(key_id).await
    }

    async fn put(&self, key_id: &str, bytes: &[u8]) -> hp_secrets::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key_id, bytes).await
    }

    async fn delete(&self, key_id: &str) -> hp_secrets::Result<()> {
        self.inner.delete(key_id).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Collaborators to use instead of the harness defaults
#[derive(Default)]
pub struct Overrides {
    pub billing: Option<Arc<dyn BillingService>>,
    pub tokens: Option<Arc<dyn SourceControlTokens>>,
    pub keys: Option<Arc<dyn KeyStore>>,
}

pub struct Harness {
    pub platform: Platform,
    pub store: Arc<MemoryStore>,
    pub hosting: Arc<MockHosting>,
    pub billing: Arc<LoggingBilling>,
    pub keys: Arc<MemoryKeyStore>,
    pub build_logs: Arc<MemoryBuildLogStore>,
    pub shutdown: CancelHandle,
}

pub fn config(mode: DispatchMode) -> ControlPlaneConfig {
    let mut config = ControlPlaneConfig::default();
    config.deploy.mode = mode;
    config
}

/// Platform with inline deploy dispatch
pub fn harness() -> Harness {
    harness_with(config(DispatchMode::Inline), Overrides::default())
}

pub fn harness_with(config: ControlPlaneConfig, overrides: Overrides) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let hosting = Arc::new(MockHosting::new());
    let logging_billing = Arc::new(LoggingBilling::new());
    let keys = Arc::new(MemoryKeyStore::new());
    let build_logs = Arc::new(MemoryBuildLogStore::new());
    let (shutdown, signal) = cancel_pair();

    let deps = PlatformDeps {
        store: store.clone(),
        keys: overrides.keys.unwrap_or_else(|| keys.clone() as Arc<dyn KeyStore>),
        hosting: hosting.clone(),
        tokens: overrides
            .tokens
            .unwrap_or_else(|| Arc::new(StaticTokens::with_fallback("gh-token")) as Arc<dyn SourceControlTokens>),
        billing: overrides
            .billing
            .unwrap_or_else(|| logging_billing.clone() as Arc<dyn BillingService>),
        build_logs: build_logs.clone(),
        notifier: Arc::new(LoggingNotifier),
    };

    Harness {
        platform: Platform::build(&config, deps, signal),
        store,
        hosting,
        billing: logging_billing,
        keys,
        build_logs,
        shutdown,
    }
}

pub fn ctx() -> ExecutionContext {
    ExecutionContext::create(OWNER)
}

pub fn create_command(repository: &str) -> CreateProjectCommand {
    CreateProjectCommand {
        name: "Shop".to_string(),
        repository: repository.to_string(),
        location: None,
        tier: None,
        services: Vec::new(),
    }
}

impl Harness {
    pub async fn create_project(&self, repository: &str) -> ProvisionedProject {
        self.platform
            .create_project
            .execute(create_command(repository), &ctx())
            .await
            .unwrap()
    }
}
