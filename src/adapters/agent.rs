//! Member backup agent clients
//!
//! The hot backup itself is performed by the Hazelcast members; the operator
//! only triggers it through the cluster REST API and watches each member's
//! local backup state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crd::Hazelcast;
use crate::error::{Error, Result};

const HOT_BACKUP_PATH: &str = "hazelcast/rest/management/cluster/hotBackup";
const HOT_BACKUP_INTERRUPT_PATH: &str = "hazelcast/rest/management/cluster/hotBackupInterrupt";
const HOT_BACKUP_STATE_PATH: &str = "hazelcast/rest/management/cluster/hotBackup/state";

/// Handle on one member performing its local backup
#[async_trait]
pub trait MemberAgent: Send + Sync {
    /// Stable member address (host:port)
    fn address(&self) -> &str;

    /// Wait for the member's local backup to finish.
    ///
    /// Returns [`Error::Cancelled`] once `token` is cancelled.
    async fn wait(&self, token: &CancellationToken) -> Result<()>;

    /// Abort this member's local backup
    async fn cancel(&self) -> Result<()>;
}

/// Cluster-wide backup handle
#[async_trait]
pub trait ClusterBackup: Send + Sync {
    /// Trigger the backup on every member
    async fn start(&self) -> Result<()>;

    /// Interrupt the backup on every member
    async fn interrupt(&self) -> Result<()>;

    /// Per-member handles
    fn members(&self) -> Vec<Arc<dyn MemberAgent>>;
}

/// Opens a [`ClusterBackup`] against a live cluster
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, hazelcast: &Hazelcast) -> Result<Arc<dyn ClusterBackup>>;
}

/// Poll `check` every `interval` until it yields a result or `token` fires.
///
/// `check` returns `Ok(None)` while the operation is still running.
pub(crate) async fn poll_until<F, Fut, T>(
    token: &CancellationToken,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(done) = check().await? {
            return Ok(done);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Backup state reported by a member
#[derive(Debug, Deserialize)]
struct MemberStateResponse {
    state: String,
    #[serde(default)]
    message: Option<String>,
}

/// [`ClusterConnector`] using the Hazelcast REST API
#[derive(Clone)]
pub struct RestClusterConnector {
    http: reqwest::Client,
    poll_interval: Duration,
}

impl RestClusterConnector {
    pub fn new(http: reqwest::Client, poll_interval: Duration) -> Self {
        Self { http, poll_interval }
    }
}

#[async_trait]
impl ClusterConnector for RestClusterConnector {
    async fn connect(&self, hazelcast: &Hazelcast) -> Result<Arc<dyn ClusterBackup>> {
        let addresses = hazelcast.member_addresses();
        if addresses.is_empty() {
            return Err(Error::precondition("Hazelcast cluster reports no members"));
        }
        let members = addresses
            .into_iter()
            .map(|address| {
                Arc::new(RestMemberAgent {
                    http: self.http.clone(),
                    address,
                    poll_interval: self.poll_interval,
                })
            })
            .collect();
        Ok(Arc::new(RestClusterBackup {
            http: self.http.clone(),
            members,
        }))
    }
}

struct RestClusterBackup {
    http: reqwest::Client,
    members: Vec<Arc<RestMemberAgent>>,
}

impl RestClusterBackup {
    /// Send a cluster-wide command through the first member that accepts it
    async fn post_any(&self, path: &str) -> Result<()> {
        let mut last_err = None;
        for member in &self.members {
            let url = format!("http://{}/{}", member.address, path);
            match self.http.post(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(member = %member.address, error = %e, "Member rejected cluster command");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .map(Error::from)
            .unwrap_or_else(|| Error::agent("no members to send command to")))
    }
}

#[async_trait]
impl ClusterBackup for RestClusterBackup {
    async fn start(&self) -> Result<()> {
        self.post_any(HOT_BACKUP_PATH).await
    }

    async fn interrupt(&self) -> Result<()> {
        self.post_any(HOT_BACKUP_INTERRUPT_PATH).await
    }

    fn members(&self) -> Vec<Arc<dyn MemberAgent>> {
        self.members
            .iter()
            .map(|m| m.clone() as Arc<dyn MemberAgent>)
            .collect()
    }
}

struct RestMemberAgent {
    http: reqwest::Client,
    address: String,
    poll_interval: Duration,
}

impl RestMemberAgent {
    async fn state(&self) -> Result<Option<()>> {
        let url = format!("http://{}/{}", self.address, HOT_BACKUP_STATE_PATH);
        let resp: MemberStateResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(member = %self.address, state = %resp.state, "Polled member backup state");
        match resp.state.as_str() {
            "SUCCESS" => Ok(Some(())),
            "FAILURE" => Err(Error::agent(format!(
                "member {} backup failed: {}",
                self.address,
                resp.message.unwrap_or_else(|| "no details".to_string())
            ))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MemberAgent for RestMemberAgent {
    fn address(&self) -> &str {
        &self.address
    }

    async fn wait(&self, token: &CancellationToken) -> Result<()> {
        poll_until(token, self.poll_interval, || self.state()).await
    }

    async fn cancel(&self) -> Result<()> {
        let url = format!("http://{}/{}", self.address, HOT_BACKUP_INTERRUPT_PATH);
        self.http.post(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
