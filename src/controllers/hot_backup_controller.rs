//! HotBackup controller
//!
//! Watches HotBackup resources and triggers reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::{HotBackup, ResourceKey};
use crate::error::{Error, Result};
use crate::metrics;

/// Run the HotBackup controller until shutdown
pub async fn run(client: Client, context: Arc<Context>, namespace: Option<String>) {
    let api: Api<HotBackup> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("HotBackup CRD not installed: {}", e);
        return;
    }

    info!("Starting HotBackup controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled HotBackup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["HotBackup"])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile(obj: Arc<HotBackup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["HotBackup"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["HotBackup"]).inc();

    // the watched object may be stale, the reconciler reads its own copy
    ctx.reconciler.reconcile(&ResourceKey::of(obj.as_ref())).await
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<HotBackup>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_duration(error))
}

/// Backoff based on error type
fn requeue_duration(error: &Error) -> Duration {
    match error {
        Error::Conflict(_) => Duration::from_secs(5),
        Error::Kube(_) | Error::Http(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Schedule { .. } => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    }
}
