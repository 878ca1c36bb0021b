//! Handlers for deployment events

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use hp_config::DispatchMode;
use hp_events::{EventHandler, FailurePolicy, FireOn};
use tracing::debug;

use crate::changeset::ChangeSet;
use crate::error::{PlatformError, Result};
use crate::events::PlatformEvent;
use crate::service::{DeploymentDispatcher, DeploymentUpdate, SessionRegistry};

/// Hands a freshly queued deployment to the dispatcher
pub struct DispatchDeploymentHandler {
    dispatcher: Weak<DeploymentDispatcher>,
    mode: DispatchMode,
}

impl DispatchDeploymentHandler {
    pub fn new(dispatcher: Weak<DeploymentDispatcher>, mode: DispatchMode) -> Self {
        Self { dispatcher, mode }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for DispatchDeploymentHandler {
    fn name(&self) -> &'static str {
        "dispatch_deployment"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PostCommit
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn post_commit(&self, event: &PlatformEvent, _committed: &ChangeSet) -> Result<()> {
        let PlatformEvent::DeploymentQueued { deployment_id } = event else {
            return Ok(());
        };

        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| PlatformError::internal("deployment dispatcher is gone"))?;

        match self.mode {
            DispatchMode::Background => {
                debug!(deployment_id = %deployment_id, "Dispatching deployment in background");
                dispatcher.spawn(deployment_id.clone());
            }
            DispatchMode::Inline => {
                dispatcher.run(deployment_id).await?;
            }
        }
        Ok(())
    }
}

/// Fans status changes out to the project's realtime sessions
pub struct PublishDeploymentUpdateHandler {
    sessions: Arc<SessionRegistry>,
}

impl PublishDeploymentUpdateHandler {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for PublishDeploymentUpdateHandler {
    fn name(&self) -> &'static str {
        "publish_deployment_update"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PostCommit
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn post_commit(&self, event: &PlatformEvent, _committed: &ChangeSet) -> Result<()> {
        let PlatformEvent::DeploymentStatusChanged {
            deployment_id,
            project_id,
            status,
        } = event
        else {
            return Ok(());
        };

        let delivered = self.sessions.publish(&DeploymentUpdate {
            deployment_id: deployment_id.clone(),
            project_id: project_id.clone(),
            status: *status,
            at: Utc::now(),
        });
        debug!(deployment_id = %deployment_id, status = status.as_str(), delivered, "Deployment update published");
        Ok(())
    }
}
