use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{impl_entity, new_id};
use crate::error::{PlatformError, Result};

/// Deployment status.
///
/// ```text
/// Unknown -> Queued -> Deploying -> Completed
///              |           |-----> Failed
///              |           '-----> Cancelled
///              |-----> Failed
///              '-----> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Unknown,
    Queued,
    Deploying,
    Completed,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Unknown => "UNKNOWN",
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::Completed => "COMPLETED",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    /// Queued or deploying
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeploymentStatus::Queued | DeploymentStatus::Deploying)
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Unknown, Queued)
                | (Queued, Deploying)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Deploying, Completed)
                | (Deploying, Failed)
                | (Deploying, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl CommitInfo {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            message: None,
            author: None,
            author_email: None,
            branch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: DeploymentStatus,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub server_id: Option<String>,
    pub commit: CommitInfo,
    pub status: DeploymentStatus,
    pub status_history: Vec<StatusChange>,
    pub error: Option<String>,
    pub build_duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_entity!(Deployment, "deployment");

impl Deployment {
    /// A new deployment in `Queued`
    pub fn queue(project_id: impl Into<String>, server_id: Option<String>, commit: CommitInfo) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.into(),
            server_id,
            commit,
            status: DeploymentStatus::Queued,
            status_history: vec![StatusChange {
                status: DeploymentStatus::Queued,
                at: now,
                reason: None,
            }],
            error: None,
            build_duration_ms: None,
            started_at: None,
            finished_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_url(&self) -> String {
        format!("/deployments/{}/status", self.id)
    }

    /// Apply a status transition, recording it in the history
    pub fn transition(&mut self, next: DeploymentStatus, reason: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PlatformError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            DeploymentStatus::Deploying => self.started_at = Some(now),
            DeploymentStatus::Failed | DeploymentStatus::Cancelled => {
                self.error = reason.clone();
            }
            _ => {}
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.build_duration_ms = self
                .started_at
                .map(|started| (now - started).num_milliseconds().max(0) as u64);
        }

        self.status = next;
        self.status_history.push(StatusChange {
            status: next,
            at: now,
            reason,
        });
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> Deployment {
        Deployment::queue("p1", Some("s1".into()), CommitInfo::new("abc123"))
    }

    #[test]
    fn test_happy_path() {
        let mut d = deployment();
        d.transition(DeploymentStatus::Deploying, None).unwrap();
        assert!(d.started_at.is_some());
        d.transition(DeploymentStatus::Completed, None).unwrap();

        assert!(d.finished_at.is_some());
        assert!(d.build_duration_ms.is_some());
        let history: Vec<_> = d.status_history.iter().map(|c| c.status).collect();
        assert_eq!(
            history,
            vec![
                DeploymentStatus::Queued,
                DeploymentStatus::Deploying,
                DeploymentStatus::Completed
            ]
        );
    }

    #[test]
    fn test_failure_records_reason() {
        let mut d = deployment();
        d.transition(DeploymentStatus::Deploying, None).unwrap();
        d.transition(DeploymentStatus::Failed, Some("remote returned 502".into()))
            .unwrap();
        assert_eq!(d.error.as_deref(), Some("remote returned 502"));
    }

    #[test]
    fn test_terminal_states_never_regress() {
        for terminal in [
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
            DeploymentStatus::Cancelled,
        ] {
            for next in [
                DeploymentStatus::Unknown,
                DeploymentStatus::Queued,
                DeploymentStatus::Deploying,
                DeploymentStatus::Completed,
                DeploymentStatus::Failed,
                DeploymentStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn test_cannot_skip_deploying() {
        let mut d = deployment();
        let err = d.transition(DeploymentStatus::Completed, None).unwrap_err();
        assert!(matches!(err, PlatformError::InvalidTransition { .. }));
        assert_eq!(d.status, DeploymentStatus::Queued);
        assert_eq!(d.status_history.len(), 1);
    }

    #[test]
    fn test_cancel_from_queued() {
        let mut d = deployment();
        d.transition(DeploymentStatus::Cancelled, Some("cancelled by user".into()))
            .unwrap();
        assert!(d.status.is_terminal());
        assert_eq!(d.build_duration_ms, None);
    }
}
