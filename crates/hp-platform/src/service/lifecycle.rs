//! Lifecycle Manager - Background tasks for the control plane
//!
//! Handles:
//! - Server usage polling
//! - Stuck deployment sweeping
//! - Graceful shutdown coordination

use std::sync::Arc;
use std::time::Duration;

use hp_config::PollingConfig;
use hp_events::CancelHandle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{DeploymentDispatcher, UsagePoller};

/// Configuration for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval between usage polling rounds
    pub usage_interval: Duration,
    /// Interval between stuck deployment sweeps
    pub sweep_interval: Duration,
    /// In-flight deployments older than this are failed by the sweeper
    pub deploying_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for LifecycleConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            usage_interval: config.usage_interval(),
            sweep_interval: config.sweep_interval(),
            deploying_timeout: config.deploying_timeout(),
        }
    }
}

pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
    cancel: CancelHandle,
}

impl LifecycleManager {
    /// Start all lifecycle tasks. `cancel` is triggered on shutdown so that
    /// in-flight deploy calls and polling rounds stop early.
    pub fn start(
        dispatcher: Arc<DeploymentDispatcher>,
        poller: Arc<UsagePoller>,
        config: LifecycleConfig,
        cancel: CancelHandle,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Usage poller
        {
            let poller = poller.clone();
            let signal = cancel.signal();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.usage_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!("Running usage poll");
                            if let Err(e) = poller.poll_once(&signal).await {
                                warn!(error = %e, "Usage poll round failed");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Usage poller shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Stuck deployment sweeper
        {
            let dispatcher = dispatcher.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.sweep_interval;
            let timeout = config.deploying_timeout;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match dispatcher.fail_stuck_deployments(timeout).await {
                                Ok(0) => debug!("No stuck deployments"),
                                Ok(failed) => warn!(failed, "Failed stuck deployments"),
                                Err(e) => error!(error = %e, "Stuck deployment sweep failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Deployment sweeper shutting down");
                            break;
                        }
                    }
                }
            });
        }

        info!(
            usage_interval_secs = config.usage_interval.as_secs(),
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "Lifecycle manager started with all background tasks"
        );

        Self { shutdown_tx, cancel }
    }

    /// Signal shutdown to all lifecycle tasks and cancel in-flight work
    pub async fn shutdown(&self) {
        info!("Lifecycle manager shutting down...");
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.usage_interval, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.deploying_timeout, Duration::from_secs(900));
    }
}
