//! Startup wiring of stores, handlers, dispatcher and use cases

use std::sync::Arc;

use axum::Router;
use hp_config::ControlPlaneConfig;
use hp_events::CancelSignal;
use hp_hosting::HostingApi;
use hp_secrets::KeyStore;
use tracing::info;

use crate::allocator::{DomainAllocator, ServerAllocator};
use crate::api::{self, AppState};
use crate::collaborators::{BillingService, BuildLogStore, Notifier, SourceControlTokens};
use crate::domain::ProjectService;
use crate::events::PlatformInterceptor;
use crate::handlers::{build_registry, HandlerDeps};
use crate::operations::{
    CancelDeploymentUseCase, CreateProjectUseCase, DeployProjectUseCase, DeploymentQueries, ReportServicesUseCase,
};
use crate::repository::PlatformStore;
use crate::service::{DeploymentDispatcher, LifecycleConfig, SessionRegistry, UsagePoller};

/// External collaborators the platform is built on
#[derive(Clone)]
pub struct PlatformDeps {
    pub store: Arc<dyn PlatformStore>,
    pub keys: Arc<dyn KeyStore>,
    pub hosting: Arc<dyn HostingApi>,
    pub tokens: Arc<dyn SourceControlTokens>,
    pub billing: Arc<dyn BillingService>,
    pub build_logs: Arc<dyn BuildLogStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Platform {
    pub store: Arc<dyn PlatformStore>,
    pub interceptor: PlatformInterceptor,
    pub dispatcher: Arc<DeploymentDispatcher>,
    pub sessions: Arc<SessionRegistry>,
    pub poller: Arc<UsagePoller>,
    pub lifecycle: LifecycleConfig,
    pub create_project: Arc<CreateProjectUseCase>,
    pub report_services: Arc<ReportServicesUseCase>,
    pub deploy_project: Arc<DeployProjectUseCase>,
    pub cancel_deployment: Arc<CancelDeploymentUseCase>,
    pub deployments: Arc<DeploymentQueries>,
}

impl Platform {
    /// Wire everything together. `shutdown` aborts in-flight deploy calls.
    pub fn build(config: &ControlPlaneConfig, deps: PlatformDeps, shutdown: CancelSignal) -> Self {
        let sessions = Arc::new(SessionRegistry::new());

        let domains = DomainAllocator::from_config(&config.domains);
        let handler_deps = HandlerDeps {
            store: deps.store.clone(),
            keys: deps.keys.clone(),
            hosting: deps.hosting.clone(),
            billing: deps.billing.clone(),
            notifier: deps.notifier.clone(),
            sessions: sessions.clone(),
            domains: domains.clone(),
            servers: ServerAllocator::new(deps.store.clone(), config.hosting.clone()),
            default_services: config
                .domains
                .default_services
                .iter()
                .map(|s| ProjectService::http(&s.name, s.port))
                .collect(),
            deploy_mode: config.deploy.mode,
        };

        // The registry's deploy handler points back at the dispatcher that
        // owns the interceptor built from that registry.
        let dispatcher = Arc::new_cyclic(|weak| {
            let registry = build_registry(&handler_deps, weak.clone());
            let interceptor =
                PlatformInterceptor::new(Arc::new(registry)).with_max_passes(config.dispatch.max_passes);
            DeploymentDispatcher::new(
                deps.store.clone(),
                deps.hosting.clone(),
                deps.tokens.clone(),
                deps.build_logs.clone(),
                interceptor,
                config.deploy.timeout(),
                shutdown,
            )
        });
        let interceptor = dispatcher.interceptor().clone();

        info!(
            handlers = interceptor.registry().len(),
            max_passes = interceptor.max_passes(),
            deploy_mode = ?config.deploy.mode,
            "Event handlers registered"
        );

        Self {
            create_project: Arc::new(CreateProjectUseCase::new(
                deps.store.clone(),
                interceptor.clone(),
                domains.clone(),
                &config.hosting.default_location,
            )),
            report_services: Arc::new(ReportServicesUseCase::new(
                deps.store.clone(),
                interceptor.clone(),
                domains,
            )),
            deploy_project: Arc::new(DeployProjectUseCase::new(deps.store.clone(), interceptor.clone())),
            cancel_deployment: Arc::new(CancelDeploymentUseCase::new(deps.store.clone(), dispatcher.clone())),
            deployments: Arc::new(DeploymentQueries::new(deps.store.clone(), deps.build_logs.clone())),
            poller: Arc::new(UsagePoller::new(deps.store.clone(), deps.hosting.clone())),
            lifecycle: LifecycleConfig::from(&config.polling),
            store: deps.store,
            interceptor,
            dispatcher,
            sessions,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            create_project: self.create_project.clone(),
            report_services: self.report_services.clone(),
            deploy_project: self.deploy_project.clone(),
            cancel_deployment: self.cancel_deployment.clone(),
            deployments: self.deployments.clone(),
            sessions: self.sessions.clone(),
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.app_state())
    }
}
