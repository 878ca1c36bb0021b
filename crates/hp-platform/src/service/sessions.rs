//! Realtime deployment update sessions
//!
//! One entry per connected stream, grouped by project. Streams hold a
//! [`SessionGuard`] that evicts the session when the stream is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::domain::DeploymentStatus;

const DEFAULT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUpdate {
    pub deployment_id: String,
    pub project_id: String,
    pub status: DeploymentStatus,
    pub at: DateTime<Utc>,
}

struct Session {
    id: u64,
    tx: mpsc::Sender<DeploymentUpdate>,
}

pub struct Subscription {
    pub session_id: u64,
    pub project_id: String,
    pub receiver: mpsc::Receiver<DeploymentUpdate>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Vec<Session>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn connect(&self, project_id: &str) -> Subscription {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel(self.buffer);
        self.sessions
            .entry(project_id.to_string())
            .or_default()
            .push(Session { id: session_id, tx });

        debug!(project_id = %project_id, session_id, "Deployment stream connected");
        Subscription {
            session_id,
            project_id: project_id.to_string(),
            receiver,
        }
    }

    pub fn disconnect(&self, project_id: &str, session_id: u64) {
        if let Some(mut sessions) = self.sessions.get_mut(project_id) {
            sessions.retain(|s| s.id != session_id);
        }
        self.sessions.remove_if(project_id, |_, sessions| sessions.is_empty());
        debug!(project_id = %project_id, session_id, "Deployment stream disconnected");
    }

    /// Deliver to every session of the project. Returns the number of
    /// sessions that accepted the update. Closed sessions are evicted; a
    /// session whose buffer is full misses this update.
    pub fn publish(&self, update: &DeploymentUpdate) -> usize {
        let mut delivered = 0;

        if let Some(mut sessions) = self.sessions.get_mut(&update.project_id) {
            sessions.retain(|session| match session.tx.try_send(update.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id = session.id, "Deployment stream lagging, update dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        self.sessions.remove_if(&update.project_id, |_, sessions| sessions.is_empty());

        delivered
    }

    pub fn session_count(&self, project_id: &str) -> usize {
        self.sessions.get(project_id).map(|s| s.len()).unwrap_or(0)
    }
}

/// Disconnects its session when dropped
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    project_id: String,
    session_id: u64,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, project_id: impl Into<String>, session_id: u64) -> Self {
        Self {
            registry,
            project_id: project_id.into(),
            session_id,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.disconnect(&self.project_id, self.session_id);
    }
}
