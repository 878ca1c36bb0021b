//! Deployment dispatcher
//!
//! Drives a deployment from `Queued` to a terminal status:
//! - `Queued -> Deploying`, committed before the remote call
//! - signed deploy call to the project's server, bounded by the deploy timeout
//! - `Completed` on 2xx, `Failed` with the reason otherwise
//!
//! Every status write goes through the interceptor so status-change and
//! finished events reach their handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use hp_common::{render_build_log, BuildLogEntry, LogLevel};
use hp_events::{best_effort, CancelSignal, DispatchError, Timing};
use hp_hosting::{DeployRequest, HostingApi};
use tracing::{debug, error, info, warn};

use crate::changeset::ChangeSet;
use crate::collaborators::{BuildLogStore, SourceControlTokens};
use crate::domain::{Deployment, DeploymentStatus, Entity, Server};
use crate::error::{PlatformError, Result};
use crate::events::{PlatformEvent, PlatformInterceptor, PlatformUnitOfWork};
use crate::repository::PlatformStore;

const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct DeploymentDispatcher {
    store: Arc<dyn PlatformStore>,
    hosting: Arc<dyn HostingApi>,
    tokens: Arc<dyn SourceControlTokens>,
    build_logs: Arc<dyn BuildLogStore>,
    interceptor: PlatformInterceptor,
    deploy_timeout: Duration,
    shutdown: CancelSignal,
}

/// Log lines collected while dispatching, uploaded once finished
struct BuildLog(Vec<BuildLogEntry>);

impl BuildLog {
    fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        let now: NaiveDateTime = Utc::now().naive_utc();
        self.0.push(BuildLogEntry::new(now, level, message));
    }
}

impl DeploymentDispatcher {
    pub fn new(
        store: Arc<dyn PlatformStore>,
        hosting: Arc<dyn HostingApi>,
        tokens: Arc<dyn SourceControlTokens>,
        build_logs: Arc<dyn BuildLogStore>,
        interceptor: PlatformInterceptor,
        deploy_timeout: Duration,
        shutdown: CancelSignal,
    ) -> Self {
        Self {
            store,
            hosting,
            tokens,
            build_logs,
            interceptor,
            deploy_timeout,
            shutdown,
        }
    }

    pub fn interceptor(&self) -> &PlatformInterceptor {
        &self.interceptor
    }

    /// Run [`run`](Self::run) on the runtime without waiting for it
    pub fn spawn(self: &Arc<Self>, deployment_id: String) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run(&deployment_id).await {
                error!(deployment_id = %deployment_id, error = %e, "Deployment dispatch failed");
            }
        });
    }

    /// Dispatch a queued deployment and return the status it ended in.
    /// Deployments that are no longer `Queued` are left alone.
    pub async fn run(&self, deployment_id: &str) -> Result<DeploymentStatus> {
        let deployment = self.load(deployment_id).await?;
        if deployment.status != DeploymentStatus::Queued {
            debug!(deployment_id, status = deployment.status.as_str(), "Deployment not queued, skipping");
            return Ok(deployment.status);
        }

        let mut log = BuildLog(Vec::new());
        log.push(
            LogLevel::Info,
            format!("Deployment {} queued for commit {}", deployment.id, deployment.commit.hash),
        );

        let (server, request) = match self.prepare(&deployment).await {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(deployment_id, reason = %reason, "Deployment prerequisites missing");
                return self.finish(deployment_id, DeploymentStatus::Failed, Some(reason), log).await;
            }
        };

        if self
            .transition(deployment_id, DeploymentStatus::Deploying, None)
            .await?
            .is_none()
        {
            return Ok(self.load(deployment_id).await?.status);
        }
        log.push(
            LogLevel::Info,
            format!("Deploying {} to server {}", request.repo_name, server.id),
        );
        info!(deployment_id, server_id = %server.id, "Deploying");

        match self.call_remote(&server, &request).await {
            Ok(()) => {
                log.push(LogLevel::Success, "Hosting server accepted the deployment");
                self.finish(deployment_id, DeploymentStatus::Completed, None, log).await
            }
            Err(reason) => {
                warn!(deployment_id, reason = %reason, "Deploy call failed");
                self.finish(deployment_id, DeploymentStatus::Failed, Some(reason), log).await
            }
        }
    }

    /// Fail deployments that have been in flight longer than `timeout`.
    /// Returns how many were failed.
    pub async fn fail_stuck_deployments(&self, timeout: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| PlatformError::internal(format!("Invalid timeout: {}", e)))?;
        let mut failed = 0;

        for status in [DeploymentStatus::Deploying, DeploymentStatus::Queued] {
            for deployment in self.store.find_deployments_in_status(status).await? {
                let since = deployment.started_at.unwrap_or(deployment.created_at);
                if since > cutoff {
                    continue;
                }

                error!(
                    deployment_id = %deployment.id,
                    status = status.as_str(),
                    since = %since,
                    "Deployment exceeded its in-flight timeout"
                );
                let reason = format!("Timed out in {} after {}s", status.as_str(), timeout.as_secs());
                if self
                    .transition(&deployment.id, DeploymentStatus::Failed, Some(reason))
                    .await?
                    .is_some()
                {
                    failed += 1;
                }
            }
        }

        Ok(failed)
    }

    async fn load(&self, deployment_id: &str) -> Result<Deployment> {
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(Deployment::ENTITY_TYPE, deployment_id))
    }

    /// Resolve server and access token. Errors are failure reasons.
    async fn prepare(&self, deployment: &Deployment) -> std::result::Result<(Server, DeployRequest), String> {
        let project = match self.store.get_project(&deployment.project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return Err(format!("Project {} no longer exists", deployment.project_id)),
            Err(e) => return Err(format!("Failed to load project: {}", e)),
        };

        let Some(server_id) = deployment.server_id.clone().or_else(|| project.server_id.clone()) else {
            return Err(format!("Project {} has no server assigned", project.id));
        };
        let server = match self.store.get_server(&server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => return Err(format!("Server {} not found", server_id)),
            Err(e) => return Err(format!("Failed to load server: {}", e)),
        };

        let access_token = match self.tokens.access_token(&project.owner_id).await {
            Ok(Some(token)) => token,
            Ok(None) => return Err("No source-control token for the project owner".to_string()),
            Err(e) => return Err(format!("Failed to fetch source-control token: {}", e)),
        };

        let request = DeployRequest {
            project_id: project.id.clone(),
            access_token,
            repo_name: project.repository.clone(),
            commit_hash: deployment.commit.hash.clone(),
            deployment_id: deployment.id.clone(),
        };
        Ok((server, request))
    }

    async fn call_remote(&self, server: &Server, request: &DeployRequest) -> std::result::Result<(), String> {
        let target = server.target();
        let mut shutdown = self.shutdown.clone();

        tokio::select! {
            _ = shutdown.cancelled() => Err("Control plane shut down during deployment".to_string()),
            result = tokio::time::timeout(self.deploy_timeout, self.hosting.deploy(&target, request)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "Deploy call timed out after {}s",
                        self.deploy_timeout.as_secs()
                    )),
                }
            }
        }
    }

    async fn finish(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        reason: Option<String>,
        mut log: BuildLog,
    ) -> Result<DeploymentStatus> {
        match (&reason, status) {
            (Some(reason), _) => log.push(LogLevel::Error, reason.clone()),
            (None, DeploymentStatus::Completed) => log.push(LogLevel::Success, "Deployment completed"),
            _ => {}
        }

        let final_status = match self.transition(deployment_id, status, reason).await? {
            Some(deployment) => deployment.status,
            None => self.load(deployment_id).await?.status,
        };

        best_effort(
            "build_log_upload",
            self.build_logs.upload(deployment_id, render_build_log(&log.0)),
        )
        .await;

        Ok(final_status)
    }

    /// Apply and commit a status transition. Returns `None` when the
    /// deployment has concurrently moved somewhere this transition no longer
    /// applies (for example it was cancelled).
    pub(crate) async fn transition(
        &self,
        deployment_id: &str,
        next: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<Option<Deployment>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut deployment = self.load(deployment_id).await?;
            if !deployment.status.can_transition_to(next) {
                warn!(
                    deployment_id,
                    current = deployment.status.as_str(),
                    next = next.as_str(),
                    "Deployment moved on concurrently, transition dropped"
                );
                return Ok(None);
            }
            deployment.transition(next, reason.clone())?;

            let mut uow = PlatformUnitOfWork::new(ChangeSet::new());
            uow.raise(
                deployment.key(),
                PlatformEvent::DeploymentStatusChanged {
                    deployment_id: deployment.id.clone(),
                    project_id: deployment.project_id.clone(),
                    status: next,
                },
                &Timing::POST,
            );
            if next.is_terminal() {
                uow.notify(PlatformEvent::DeploymentFinished {
                    deployment_id: deployment.id.clone(),
                    project_id: deployment.project_id.clone(),
                    status: next,
                });
            }
            uow.work_mut().deployments.modify(deployment);

            // Status writes are not cancellable; a terminal status must land.
            match self
                .interceptor
                .save_changes(uow, self.store.as_ref(), &CancelSignal::never())
                .await
            {
                Ok(committed) => {
                    metrics::counter!("hostpilot_deployments_total", "status" => next.as_str()).increment(1);
                    let deployment = committed
                        .work
                        .deployments
                        .get(deployment_id)
                        .cloned()
                        .ok_or_else(|| PlatformError::internal("committed deployment missing from change set"))?;
                    return Ok(Some(deployment));
                }
                Err(DispatchError::Commit(PlatformError::ConcurrencyConflict { .. })) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(deployment_id, attempt, "Deployment changed while writing status, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PlatformError::internal(format!(
            "could not write status of deployment {}",
            deployment_id
        )))
    }
}
