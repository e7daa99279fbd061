//! HotBackup status persistence
//!
//! Every write re-reads the resource and retries on optimistic concurrency
//! conflicts, so concurrent writers (other workers, users editing the spec)
//! are resolved by read-modify-retry rather than locking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::adapters::ResourceStore;
use crate::crd::{
    HotBackup, HotBackupSpec, HotBackupState, HotBackupStatus, ResourceKey, FINALIZER_NAME,
    LAST_SUCCESSFUL_SPEC_ANNOTATION,
};
use crate::error::{Error, Result};
use crate::metrics;

/// Retry budget for conflicting writes
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub steps: u32,
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after every conflict
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_backoff: Duration::from_millis(10),
            factor: 1.0,
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or the
/// budget is spent.
pub async fn retry_on_conflict<F, Fut, T>(config: RetryConfig, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = config.initial_backoff;
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_conflict() && tries < config.steps.max(1) => {
                metrics::STATUS_CONFLICTS.inc();
                debug!(
                    attempt = tries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Write conflict, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.mul_f64(config.factor.max(1.0));
            }
            Err(e) => {
                if e.is_conflict() {
                    metrics::STATUS_CONFLICTS.inc();
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

/// Content hash of a spec, used to recognise already applied configurations
pub fn spec_hash(spec: &HotBackupSpec) -> Result<String> {
    let canonical = serde_json::to_vec(spec)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Conflict-tolerant writer for HotBackup status and metadata
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn ResourceStore>,
    retry: RetryConfig,
}

impl StatusStore {
    pub fn new(store: Arc<dyn ResourceStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    async fn fetch(&self, key: &ResourceKey) -> Result<HotBackup> {
        self.store
            .get_backup(key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Persist `state` and `message`, leaving every other field as read.
    ///
    /// An unchanged status is not rewritten, so repeated passes do not
    /// generate watch events.
    pub async fn update_status(
        &self,
        key: &ResourceKey,
        state: HotBackupState,
        message: Option<String>,
    ) -> Result<()> {
        retry_on_conflict(self.retry, || async {
            let mut backup = self.fetch(key).await?;
            let status = HotBackupStatus {
                state,
                message: message.clone(),
            };
            if backup.status.as_ref() == Some(&status) {
                return Ok(backup);
            }
            backup.status = Some(status);
            self.store.replace_backup_status(&backup).await
        })
        .await?;
        debug!(backup = %key, state = %state, "Status updated");
        Ok(())
    }

    /// Persist `Failure` with the error text and hand the error back.
    ///
    /// A failing status write is logged; the caller always gets `error`.
    pub async fn fail(&self, key: &ResourceKey, error: Error) -> Result<()> {
        if let Err(e) = self
            .update_status(key, HotBackupState::Failure, Some(error.to_string()))
            .await
        {
            warn!(backup = %key, error = %e, "Could not persist Failure status");
        }
        Err(error)
    }

    /// Record `hash` as the content hash of the last successfully applied spec
    pub async fn record_applied_spec(&self, key: &ResourceKey, hash: &str) -> Result<()> {
        retry_on_conflict(self.retry, || async {
            let mut backup = self.fetch(key).await?;
            if backup.last_applied_hash() == Some(hash) {
                return Ok(backup);
            }
            backup
                .metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(LAST_SUCCESSFUL_SPEC_ANNOTATION.to_string(), hash.to_string());
            self.store.replace_backup(&backup).await
        })
        .await?;
        debug!(backup = %key, "Recorded applied spec");
        Ok(())
    }

    /// Attach the cleanup finalizer unless it is already present
    pub async fn add_finalizer(&self, key: &ResourceKey) -> Result<()> {
        retry_on_conflict(self.retry, || async {
            let mut backup = self.fetch(key).await?;
            if backup.has_finalizer() || backup.is_deleting() {
                return Ok(());
            }
            backup
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER_NAME.to_string());
            self.store.replace_backup(&backup).await.map(|_| ())
        })
        .await
    }

    /// Drop the cleanup finalizer; a gone resource counts as done.
    ///
    /// Returns whether this call removed it.
    pub async fn remove_finalizer(&self, key: &ResourceKey) -> Result<bool> {
        retry_on_conflict(self.retry, || async {
            let Some(mut backup) = self.store.get_backup(key).await? else {
                return Ok(false);
            };
            if !backup.has_finalizer() {
                return Ok(false);
            }
            if let Some(finalizers) = backup.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != FINALIZER_NAME);
            }
            match self.store.replace_backup(&backup).await {
                Err(Error::NotFound(_)) => Ok(false),
                other => other.map(|_| true),
            }
        })
        .await
    }
}
