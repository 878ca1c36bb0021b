//! Server usage polling

use std::sync::Arc;

use hp_events::CancelSignal;
use hp_hosting::HostingApi;
use tracing::{debug, info, warn};

use crate::changeset::ChangeSet;
use crate::error::Result;
use crate::repository::PlatformStore;

/// Outcome of one polling round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub failed: usize,
}

/// Polls every server's usage endpoint and stores the latest sample.
/// Unreachable servers are counted and skipped.
pub struct UsagePoller {
    store: Arc<dyn PlatformStore>,
    hosting: Arc<dyn HostingApi>,
}

impl UsagePoller {
    pub fn new(store: Arc<dyn PlatformStore>, hosting: Arc<dyn HostingApi>) -> Self {
        Self { store, hosting }
    }

    pub async fn poll_once(&self, cancel: &CancelSignal) -> Result<PollSummary> {
        let mut summary = PollSummary::default();

        for server in self.store.list_servers().await? {
            if cancel.is_cancelled() {
                debug!("Usage polling cancelled");
                break;
            }

            let usage = match self.hosting.usage(&server.target()).await {
                Ok(usage) => usage,
                Err(e) => {
                    warn!(server_id = %server.id, error = %e, "Usage poll failed");
                    metrics::counter!("hostpilot_usage_poll_failures_total").increment(1);
                    summary.failed += 1;
                    continue;
                }
            };

            let server_id = server.id.clone();
            let mut server = server;
            server.record_usage(usage);

            let mut changes = ChangeSet::new();
            changes.servers.modify(server);
            if let Err(e) = self.store.commit_changes(&mut changes).await {
                // The server changed since it was listed; the next round picks it up.
                warn!(server_id = %server_id, error = %e, "Failed to store usage sample");
                summary.failed += 1;
                continue;
            }
            summary.polled += 1;
        }

        info!(polled = summary.polled, failed = summary.failed, "Usage poll complete");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hp_common::ServerUsage;
    use hp_hosting::{DeployRequest, DomainRefreshRequest, HostingError, ServerTarget};

    use crate::domain::Server;
    use crate::repository::MemoryStore;

    /// Reports usage for `srv-ok`, fails for everything else
    struct PartialHosting;

    #[async_trait]
    impl HostingApi for PartialHosting {
        async fn health(&self, _target: &ServerTarget) -> hp_hosting::Result<()> {
            Ok(())
        }

        async fn deploy(&self, _target: &ServerTarget, _request: &DeployRequest) -> hp_hosting::Result<()> {
            Ok(())
        }

        async fn refresh_domains(
            &self,
            _target: &ServerTarget,
            _request: &DomainRefreshRequest,
        ) -> hp_hosting::Result<()> {
            Ok(())
        }

        async fn usage(&self, target: &ServerTarget) -> hp_hosting::Result<ServerUsage> {
            if target.server_id == "srv-ok" {
                Ok(ServerUsage {
                    cpu_percent: 12.5,
                    ..Default::default()
                })
            } else {
                Err(HostingError::Transport("connection refused".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_servers_are_tolerated() {
        let store = Arc::new(MemoryStore::new());
        store.seed_server(Server::new("srv-ok", "eu-central", "https://ok", "pk"));
        store.seed_server(Server::new("srv-down", "eu-central", "https://down", "pk"));
        let poller = UsagePoller::new(store.clone(), Arc::new(PartialHosting));

        let summary = poller.poll_once(&CancelSignal::never()).await.unwrap();
        assert_eq!(summary, PollSummary { polled: 1, failed: 1 });

        let server = store.get_server("srv-ok").await.unwrap().unwrap();
        let usage = server.usage.unwrap();
        assert_eq!(usage.cpu_percent, 12.5);
        assert!(usage.sampled_at.is_some());
        assert!(store.get_server("srv-down").await.unwrap().unwrap().usage.is_none());
    }
}
