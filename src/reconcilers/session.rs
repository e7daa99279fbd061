//! Per-run cluster backup session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{ClusterBackup, ClusterConnector, MemberAgent};
use crate::crd::Hazelcast;
use crate::error::Result;

/// Ownership handle for one member's part of a run
#[derive(Clone)]
pub struct MemberBackupTask {
    pub address: String,
    pub agent: Arc<dyn MemberAgent>,
}

/// Live handle on one distributed backup attempt.
///
/// Created fresh for every run and dropped when the run finishes. All member
/// tasks of the run share the session's cancellation token.
pub struct ClusterBackupSession {
    cluster: Arc<dyn ClusterBackup>,
    members: Vec<MemberBackupTask>,
    token: CancellationToken,
    interrupted: AtomicBool,
}

impl ClusterBackupSession {
    /// Connect to the live cluster. `token` scopes cancellation of this run.
    pub async fn open(
        connector: &dyn ClusterConnector,
        hazelcast: &Hazelcast,
        token: CancellationToken,
    ) -> Result<Self> {
        let cluster = connector.connect(hazelcast).await?;
        let members = cluster
            .members()
            .into_iter()
            .map(|agent| MemberBackupTask {
                address: agent.address().to_string(),
                agent,
            })
            .collect();
        Ok(Self {
            cluster,
            members,
            token,
            interrupted: AtomicBool::new(false),
        })
    }

    /// Trigger the backup on every member
    pub async fn start(&self) -> Result<()> {
        self.cluster.start().await
    }

    pub fn members(&self) -> &[MemberBackupTask] {
        &self.members
    }

    /// Token shared by every task of this run
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop all members: cancel the run scope and interrupt the cluster once.
    ///
    /// Safe to call from every member task; later calls are no-ops.
    pub async fn cancel(&self) {
        self.token.cancel();
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Interrupting cluster backup");
        if let Err(e) = self.cluster.interrupt().await {
            warn!(error = %e, "Cluster backup interrupt failed");
        }
    }
}
