use std::sync::Arc;

use async_trait::async_trait;
use hp_events::{EventHandler, FailurePolicy, FireOn};

use crate::changeset::ChangeSet;
use crate::collaborators::{Notification, Notifier};
use crate::domain::{DeploymentStatus, Project};
use crate::error::{PlatformError, Result};
use crate::events::PlatformEvent;
use crate::repository::PlatformStore;

/// Tells the project owner about provisioning and finished deployments
pub struct NotifyOwnerHandler {
    store: Arc<dyn PlatformStore>,
    notifier: Arc<dyn Notifier>,
}

impl NotifyOwnerHandler {
    pub fn new(store: Arc<dyn PlatformStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    async fn project(&self, id: &str) -> Result<Project> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| PlatformError::not_found("project", id))
    }
}

#[async_trait]
impl EventHandler<PlatformEvent, ChangeSet> for NotifyOwnerHandler {
    fn name(&self) -> &'static str {
        "notify_owner"
    }

    fn fire_on(&self) -> FireOn {
        FireOn::PostCommit
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn post_commit(&self, event: &PlatformEvent, _committed: &ChangeSet) -> Result<()> {
        let notification = match event {
            PlatformEvent::ProjectProvisioned { project_id, owner_id } => {
                let project = self.project(project_id).await?;
                Notification {
                    recipient_id: owner_id.clone(),
                    subject: format!("{} is ready", project.name),
                    body: format!(
                        "Your project {} ({}) has been provisioned in {}.",
                        project.name, project.repository, project.location
                    ),
                }
            }
            PlatformEvent::DeploymentFinished {
                deployment_id,
                project_id,
                status,
            } => {
                let project = self.project(project_id).await?;
                let outcome = match status {
                    DeploymentStatus::Completed => "succeeded",
                    DeploymentStatus::Cancelled => "was cancelled",
                    _ => "failed",
                };
                Notification {
                    recipient_id: project.owner_id.clone(),
                    subject: format!("Deployment of {} {}", project.name, outcome),
                    body: format!("Deployment {} of {} {}.", deployment_id, project.repository, outcome),
                }
            }
            _ => return Ok(()),
        };

        self.notifier.send(&notification).await
    }
}
