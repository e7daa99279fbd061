//! HotBackup reconciler
//!
//! Level-triggered: every notification recomputes the next step from the
//! persisted spec/status and the live cluster. In order:
//! - missing resource: nothing to do
//! - deletion: drop schedule and run guard, release the finalizer
//! - no finalizer: attach it and wait for the follow-up event
//! - running, finished or already applied: nothing to do, decided on a
//!   fresh read taken under the run guard
//! - schedule dropped from the spec: its trigger is removed
//! - target cluster missing or not running: terminal `Failure`
//! - otherwise record the spec hash, then install a schedule or launch a run

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::adapters::{ClusterConnector, ResourceStore, UploadFactory};
use crate::crd::{HotBackupState, ResourceKey};
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::run::RunTrigger;
use crate::reconcilers::run_guard::RunGuard;
use crate::reconcilers::schedule::{Job, Scheduler};
use crate::reconcilers::status::{spec_hash, RetryConfig, StatusStore};

/// What a reconcile pass decided to do after claiming the run guard
enum Next {
    /// Nothing to launch; the guard is released
    Idle,
    /// Launch a direct run against this Hazelcast resource
    Launch(ResourceKey),
}

/// Reconciler owning the run guard and the recurrence scheduler.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct HotBackupReconciler {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) statuses: StatusStore,
    pub(crate) connector: Arc<dyn ClusterConnector>,
    pub(crate) uploads: Arc<dyn UploadFactory>,
    pub(crate) guard: Arc<RunGuard>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) shutdown: CancellationToken,
    /// In-flight direct and scheduled runs
    pub(crate) runs: TaskTracker,
}

impl HotBackupReconciler {
    /// Cancelling `shutdown` stops schedules and in-flight runs
    pub fn new(
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn ClusterConnector>,
        uploads: Arc<dyn UploadFactory>,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            statuses: StatusStore::new(store.clone(), retry),
            store,
            connector,
            uploads,
            guard: Arc::new(RunGuard::new()),
            scheduler: Arc::new(Scheduler::new(shutdown.child_token())),
            shutdown,
            runs: TaskTracker::new(),
        }
    }

    pub fn run_guard(&self) -> &RunGuard {
        &self.guard
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Wait up to `grace` for in-flight runs to persist their terminal status.
    ///
    /// Call after cancelling the shutdown token. Returns false on timeout.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.runs.close();
        info!(runs = self.runs.len(), "Waiting for in-flight backups to stop");
        tokio::time::timeout(grace, self.runs.wait()).await.is_ok()
    }

    /// React to a notification for `key`
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Action> {
        let Some(backup) = self.store.get_backup(key).await? else {
            info!(backup = %key, "HotBackup not found, ignoring since it must have been deleted");
            return Ok(Action::await_change());
        };

        if backup.is_deleting() {
            self.finalize(key).await?;
            return Ok(Action::await_change());
        }

        if !backup.has_finalizer() {
            self.statuses.add_finalizer(key).await?;
            info!(backup = %key, "Finalizer added");
            return Ok(Action::await_change());
        }

        let state = backup.state();
        if state.is_running() || !self.guard.try_acquire(key) {
            info!(backup = %key, state = %state, "HotBackup is already running");
            return Ok(Action::await_change());
        }

        // The guard is held from here on. Only a launched run keeps it.
        match self.apply(key).await {
            Ok(Next::Launch(hazelcast)) => {
                let this = self.clone();
                let key = key.clone();
                self.runs.spawn(async move {
                    let _ = this.run_backup(&key, &hazelcast, RunTrigger::Direct).await;
                });
                Ok(Action::await_change())
            }
            Ok(Next::Idle) => {
                self.guard.release(key);
                Ok(Action::await_change())
            }
            Err(e) => {
                self.guard.release(key);
                Err(e)
            }
        }
    }

    async fn apply(&self, key: &ResourceKey) -> Result<Next> {
        // the notification snapshot may predate a run that finished before
        // the guard was claimed
        let Some(backup) = self.store.get_backup(key).await? else {
            return Ok(Next::Idle);
        };
        let state = backup.state();
        if backup.is_deleting() || state.is_running() {
            return Ok(Next::Idle);
        }

        if !backup.spec.is_scheduled() && self.scheduler.remove(key) {
            info!(backup = %key, "Schedule dropped from spec");
        }

        let hash = spec_hash(&backup.spec)?;
        // a scheduled spec only counts as applied while its trigger is live
        let live = !backup.spec.is_scheduled()
            || self.scheduler.schedule_of(key).as_deref() == backup.spec.schedule.as_deref();
        let applied = live && backup.last_applied_hash() == Some(hash.as_str());

        // A finished one-shot backup is never re-run. A scheduled one picks up
        // spec edits so the trigger follows the new schedule.
        if state.is_finished() && (applied || !backup.spec.is_scheduled()) {
            info!(backup = %key, state = %state, "HotBackup already finished");
            return Ok(Next::Idle);
        }

        if applied {
            info!(backup = %key, "HotBackup was already applied");
            return Ok(Next::Idle);
        }

        let hazelcast_key = key.sibling(&backup.spec.hazelcast_resource_name);
        let message = match self.store.get_hazelcast(&hazelcast_key).await? {
            None => Some(format!(
                "Could not trigger hot backup: Hazelcast resource {} not found",
                hazelcast_key
            )),
            Some(hz) if !hz.is_running() => Some(format!(
                "Could not trigger hot backup: Hazelcast resource {} is not ready",
                hazelcast_key
            )),
            Some(_) => None,
        };
        if let Some(message) = message {
            warn!(backup = %key, %message, "Target cluster unavailable");
            self.statuses
                .update_status(key, HotBackupState::Failure, Some(message))
                .await?;
            return Ok(Next::Idle);
        }

        self.statuses.record_applied_spec(key, &hash).await?;

        info!(backup = %key, "Ready to start backup");
        let schedule = backup.spec.schedule.as_deref().filter(|s| !s.trim().is_empty());
        if let Some(schedule) = schedule {
            let job = self.scheduled_job(key.clone(), hazelcast_key);
            if let Err(e) = self.scheduler.install(key, schedule, job) {
                warn!(backup = %key, error = %e, "Could not install backup schedule");
                self.statuses
                    .update_status(key, HotBackupState::Failure, Some(e.to_string()))
                    .await?;
            }
            return Ok(Next::Idle);
        }

        self.statuses
            .update_status(key, HotBackupState::Pending, None)
            .await?;
        Ok(Next::Launch(hazelcast_key))
    }

    fn scheduled_job(&self, key: ResourceKey, hazelcast: ResourceKey) -> Job {
        let this = self.clone();
        Arc::new(move || -> BoxFuture<'static, ()> {
            let this = this.clone();
            let key = key.clone();
            let hazelcast = hazelcast.clone();
            let runs = this.runs.clone();
            Box::pin(runs.track_future(async move {
                let _ = this
                    .run_backup(&key, &hazelcast, RunTrigger::Scheduled)
                    .await;
            }))
        })
    }

    /// Drop in-memory state for `key` and release the finalizer. Idempotent.
    async fn finalize(&self, key: &ResourceKey) -> Result<()> {
        info!(backup = %key, "Cleaning up HotBackup");
        self.scheduler.remove(key);
        self.guard.release(key);
        if self.statuses.remove_finalizer(key).await? {
            metrics::CLEANUPS.with_label_values(&["HotBackup"]).inc();
        }
        Ok(())
    }
}
