//! HostPilot Control Plane
//!
//! Production server for the hosting control plane:
//! - REST APIs: projects, service reports, deployments, live updates
//! - Background: usage polling and stuck deployment sweeping
//! - Monitoring: Prometheus metrics and health on a separate port
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HP_CONFIG` | `hostpilot.toml` | Path to the TOML config file |
//! | `HP_API_PORT` | `8080` | HTTP API port |
//! | `HP_METRICS_PORT` | `9090` | Metrics/health port |
//! | `HP_DOMAIN_SUFFIX` | `hostpilot.app` | Suffix of internal domains |
//! | `HP_KEYSTORE_PROVIDER` | `memory` | `memory` or `encrypted` |
//! | `HP_KEYSTORE_DIR` | `./data/keys` | Directory of the encrypted key store |
//! | `HP_KEYSTORE_KEY` | - | Base64 AES-256 key for the encrypted key store |
//! | `HP_DEPLOY_TIMEOUT_SECS` | `600` | Timeout of one deploy call |
//! | `HP_USAGE_POLL_SECS` | `60` | Usage polling interval |
//! | `HP_GIT_TOKEN` | - | Fallback source-control access token |
//! | `HP_LOG_JSON` | `false` | Emit JSON log lines |
//! | `RUST_LOG` | `info` | Log level |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use hp_config::ControlPlaneConfig;
use hp_events::cancel_pair;
use hp_hosting::{HostingClient, HostingClientConfig, RequestSigner};
use hp_platform::collaborators::{LoggingBilling, LoggingNotifier, MemoryBuildLogStore, StaticTokens};
use hp_platform::repository::MemoryStore;
use hp_platform::service::LifecycleManager;
use hp_platform::{Platform, PlatformDeps};
use hp_secrets::{create_key_store, SecretsConfig};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let json = std::env::var("HP_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    describe_counter!("hostpilot_deployments_total", "Deployment status transitions by target status");
    describe_counter!("hostpilot_usage_poll_failures_total", "Usage polls that failed per server");
    describe_counter!("hostpilot_best_effort_failures_total", "Swallowed best-effort side effect failures");
    describe_counter!("hostpilot_post_commit_failures_total", "Post-commit handler failures by handler");
    describe_histogram!("hostpilot_dispatch_passes", "Pre-commit passes per committed unit of work");

    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("Starting HostPilot Control Plane");

    let config = ControlPlaneConfig::load(None).context("failed to load configuration")?;
    let prometheus = init_metrics()?;

    let keys = create_key_store(&SecretsConfig {
        provider: config.keystore.provider.clone(),
        encryption_key: config.keystore.encryption_key.clone(),
        data_dir: PathBuf::from(&config.keystore.data_dir),
    })
    .await
    .context("failed to initialise key store")?;
    info!(provider = keys.name(), "Key store ready");

    let hosting = HostingClient::new(
        HostingClientConfig {
            connect_timeout: config.hosting.connect_timeout(),
            request_timeout: config.hosting.request_timeout(),
        },
        RequestSigner::new(keys.clone()),
    )?;

    let tokens = match std::env::var("HP_GIT_TOKEN") {
        Ok(token) => StaticTokens::with_fallback(token),
        Err(_) => {
            warn!("HP_GIT_TOKEN not set, deployments fail until tokens are registered");
            StaticTokens::new()
        }
    };

    let (shutdown, shutdown_signal_rx) = cancel_pair();
    let platform = Platform::build(
        &config,
        PlatformDeps {
            store: Arc::new(MemoryStore::new()),
            keys,
            hosting: Arc::new(hosting),
            tokens: Arc::new(tokens),
            billing: Arc::new(LoggingBilling::new()),
            build_logs: Arc::new(MemoryBuildLogStore::new()),
            notifier: Arc::new(LoggingNotifier),
        },
        shutdown_signal_rx,
    );

    let lifecycle = LifecycleManager::start(
        platform.dispatcher.clone(),
        platform.poller.clone(),
        platform.lifecycle.clone(),
        shutdown,
    );

    let app = platform
        .router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    // Start metrics server
    let metrics_addr = format!("0.0.0.0:{}", config.http.metrics_port);
    info!("Metrics server listening on http://{}/metrics", metrics_addr);

    let metrics_app = Router::new()
        .route("/metrics", get(move || async move { prometheus.render() }))
        .route("/health", get(health_handler));

    let metrics_listener = TcpListener::bind(&metrics_addr).await?;
    let metrics_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            warn!(error = %e, "Metrics server stopped");
        }
    });

    // Start API server
    let api_addr = format!("0.0.0.0:{}", config.http.api_port);
    info!("API server listening on http://{}", api_addr);

    let api_listener = TcpListener::bind(&api_addr).await?;
    axum::serve(api_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received...");
    lifecycle.shutdown().await;
    metrics_task.abort();

    info!("HostPilot Control Plane shutdown complete");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
