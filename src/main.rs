//! OSO Hot Backup Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, builds
//! the reconciler, registers the HotBackup controller, and runs it.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hot_backup_operator::{
    adapters::{KubeStore, RestClusterConnector, RestUploadFactory},
    config::OperatorConfig,
    controllers::{self, Context},
    metrics,
    reconcilers::HotBackupReconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Initialize tracing
    init_tracing();

    info!("Starting OSO Hot Backup Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;

    // Cancelled on shutdown; stops schedules and in-flight runs
    let shutdown = CancellationToken::new();

    let reconciler = HotBackupReconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(RestClusterConnector::new(http.clone(), config.poll_interval())),
        Arc::new(RestUploadFactory::new(
            http,
            config.agent_port,
            config.poll_interval(),
        )),
        config.retry(),
        shutdown.clone(),
    );
    let context = Arc::new(Context::new(reconciler.clone()));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let controller =
        controllers::run_hot_backup_controller(client, context, config.watch_namespace.clone());

    // Handle graceful shutdown
    tokio::select! {
        _ = controller => {
            error!("HotBackup controller exited");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    metrics::OPERATOR_HEALTH.set(0.0);
    shutdown.cancel();
    if !reconciler.drain(config.shutdown_grace()).await {
        warn!("In-flight backups did not stop within the shutdown grace period");
    }

    info!("OSO Hot Backup Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
