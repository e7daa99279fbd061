//! Backup run body
//!
//! One run starts the cluster backup, then monitors every member in its own
//! task. A member failure cancels the whole session; siblings observe the
//! shared token, cancel their own member or upload, and stop. The run ends
//! in a persisted terminal status on every path.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{ResourceStore, UploadConfig, UploadFactory};
use crate::crd::{HotBackupState, ResourceKey};
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::hot_backup::HotBackupReconciler;
use crate::reconcilers::session::{ClusterBackupSession, MemberBackupTask};

/// How a run was started
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunTrigger {
    /// Launched by the reconciler; holds the run guard
    Direct,
    /// Fired by the recurrence scheduler
    Scheduled,
}

fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(_) => "failure",
    }
}

impl HotBackupReconciler {
    /// Execute one backup attempt and persist its terminal status.
    ///
    /// Direct runs release the run guard after the status is written.
    pub async fn run_backup(
        &self,
        key: &ResourceKey,
        hazelcast: &ResourceKey,
        trigger: RunTrigger,
    ) -> Result<()> {
        info!(backup = %key, ?trigger, "Starting backup");
        let timer = metrics::BACKUP_DURATION
            .with_label_values(&[&key.namespace, &key.name])
            .start_timer();

        let result = match self.execute(key, hazelcast).await {
            Ok(()) => {
                info!(backup = %key, "All members finished with no errors");
                self.statuses
                    .update_status(key, HotBackupState::Success, None)
                    .await
            }
            Err(e) => {
                error!(backup = %key, error = %e, "Backup failed");
                self.statuses.fail(key, e).await
            }
        };

        timer.observe_duration();
        metrics::BACKUPS_TOTAL
            .with_label_values(&[outcome_label(&result), &key.namespace, &key.name])
            .inc();

        if trigger == RunTrigger::Direct {
            self.guard.release(key);
        }
        info!(backup = %key, "Finished backup");
        result
    }

    async fn execute(&self, key: &ResourceKey, hazelcast_key: &ResourceKey) -> Result<()> {
        self.statuses
            .update_status(key, HotBackupState::InProgress, None)
            .await?;

        // scheduled runs may fire long after install, always use the latest
        let hazelcast = self
            .store
            .get_hazelcast(hazelcast_key)
            .await?
            .ok_or_else(|| {
                Error::precondition(format!("Hazelcast resource {} not found", hazelcast_key))
            })?;

        let session = ClusterBackupSession::open(
            self.connector.as_ref(),
            &hazelcast,
            self.shutdown.child_token(),
        )
        .await?;
        session.start().await?;
        let session = Arc::new(session);

        let upload = hazelcast.spec.is_external().then(|| UploadPhase {
            store: self.store.clone(),
            uploads: self.uploads.clone(),
            backup_path: hazelcast.spec.base_dir().unwrap_or_default().to_string(),
        });

        let mut tasks = JoinSet::new();
        for member in session.members().iter().cloned() {
            let monitor = MemberMonitor {
                key: key.clone(),
                session: session.clone(),
                member,
                upload: upload.clone(),
            };
            tasks.spawn(monitor.run());
        }

        info!(backup = %key, members = tasks.len(), "Waiting for members");
        let mut first_err: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    session.cancel().await;
                    Err(Error::agent(format!("member monitor aborted: {}", e)))
                }
            };
            if let Err(e) = result {
                // the member that caused the abort wins over siblings that were cancelled
                let replace = match &first_err {
                    None => true,
                    Some(prev) => prev.is_cancelled() && !e.is_cancelled(),
                };
                if replace {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => {
                warn!(backup = %key, error = %e, "One or more members failed");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

/// Everything needed to export a member's backup
#[derive(Clone)]
struct UploadPhase {
    store: Arc<dyn ResourceStore>,
    uploads: Arc<dyn UploadFactory>,
    backup_path: String,
}

/// Monitoring task for one member
struct MemberMonitor {
    key: ResourceKey,
    session: Arc<ClusterBackupSession>,
    member: MemberBackupTask,
    /// `None` when the cluster keeps backups local
    upload: Option<UploadPhase>,
}

impl MemberMonitor {
    async fn run(self) -> Result<()> {
        info!(backup = %self.key, member = %self.member.address, "Member status monitor started");
        let token = self.session.token().clone();
        let result = self.monitor(&token).await;
        metrics::MEMBER_TASKS
            .with_label_values(&[outcome_label(&result)])
            .inc();
        info!(backup = %self.key, member = %self.member.address, "Member status monitor finished");
        result
    }

    async fn monitor(&self, token: &CancellationToken) -> Result<()> {
        let address = &self.member.address;

        match self.member.agent.wait(token).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                info!(backup = %self.key, member = %address, "Cancelling member backup");
                if let Err(e) = self.member.agent.cancel().await {
                    warn!(member = %address, error = %e, "Member backup cancel failed");
                }
                self.session.cancel().await;
                return Err(Error::Cancelled);
            }
            Err(e) => {
                warn!(member = %address, error = %e, "Member backup failed, cancelling cluster backup");
                self.session.cancel().await;
                return Err(e);
            }
        }

        let Some(upload) = &self.upload else {
            return Ok(());
        };

        let result = self.upload(upload, token).await;
        metrics::UPLOADS_TOTAL
            .with_label_values(&[outcome_label(&result)])
            .inc();
        if let Err(e) = &result {
            warn!(member = %address, error = %e, "Member upload failed, cancelling cluster backup");
            self.session.cancel().await;
        }
        result
    }

    async fn upload(&self, phase: &UploadPhase, token: &CancellationToken) -> Result<()> {
        // the request may have been edited since the run started
        let backup = phase
            .store
            .get_backup(&self.key)
            .await?
            .ok_or_else(|| Error::NotFound(self.key.to_string()))?;
        let bucket_uri = backup
            .spec
            .bucket_uri
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::config("bucketURI is required for external backups"))?;

        let upload = phase.uploads.create(UploadConfig {
            member_address: self.member.address.clone(),
            bucket_uri,
            backup_path: phase.backup_path.clone(),
            hazelcast_name: backup.spec.hazelcast_resource_name.clone(),
            secret_name: backup.spec.secret.clone().unwrap_or_default(),
        })?;

        info!(backup = %self.key, member = %self.member.address, "Start and wait for member backup upload");
        match upload.start(token).await {
            Ok(()) => {}
            // nothing was transferred yet
            Err(Error::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }

        match upload.wait(token).await {
            Err(Error::Cancelled) => {
                info!(backup = %self.key, member = %self.member.address, "Cancel upload");
                upload.cancel().await
            }
            other => other,
        }
    }
}
