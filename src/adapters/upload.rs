//! Upload clients exporting completed member backups to object storage
//!
//! Uploads are performed by the backup agent sidecar running next to each
//! member. The operator starts a transfer, polls it, and deletes it to abort.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::agent::poll_until;
use crate::error::{Error, Result};

/// Everything an agent needs to export one member's backup
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct UploadConfig {
    #[serde(skip)]
    pub member_address: String,
    #[serde(rename = "bucket_url")]
    pub bucket_uri: String,
    #[serde(rename = "backup_base_dir")]
    pub backup_path: String,
    #[serde(rename = "hazelcast_cr_name")]
    pub hazelcast_name: String,
    pub secret_name: String,
}

/// One member's upload
#[async_trait]
pub trait Upload: Send + Sync {
    async fn start(&self, token: &CancellationToken) -> Result<()>;

    /// Wait for the transfer to finish.
    ///
    /// Returns [`Error::Cancelled`] once `token` is cancelled.
    async fn wait(&self, token: &CancellationToken) -> Result<()>;

    async fn cancel(&self) -> Result<()>;
}

/// Constructs [`Upload`] handles
pub trait UploadFactory: Send + Sync {
    fn create(&self, config: UploadConfig) -> Result<Box<dyn Upload>>;
}

/// [`UploadFactory`] for the agent sidecar REST API
#[derive(Clone)]
pub struct RestUploadFactory {
    http: reqwest::Client,
    agent_port: u16,
    poll_interval: Duration,
}

impl RestUploadFactory {
    pub fn new(http: reqwest::Client, agent_port: u16, poll_interval: Duration) -> Self {
        Self {
            http,
            agent_port,
            poll_interval,
        }
    }
}

/// Host part of a `host:port` member address
fn member_host(address: &str) -> &str {
    match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    }
}

impl UploadFactory for RestUploadFactory {
    fn create(&self, config: UploadConfig) -> Result<Box<dyn Upload>> {
        if config.bucket_uri.is_empty() {
            return Err(Error::config("bucketURI is required for external backups"));
        }
        let base_url = format!(
            "http://{}:{}",
            member_host(&config.member_address),
            self.agent_port
        );
        Ok(Box::new(RestUpload {
            http: self.http.clone(),
            base_url,
            config,
            poll_interval: self.poll_interval,
            id: OnceLock::new(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(alias = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(alias = "Status")]
    status: String,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

struct RestUpload {
    http: reqwest::Client,
    base_url: String,
    config: UploadConfig,
    poll_interval: Duration,
    id: OnceLock<String>,
}

impl RestUpload {
    fn id(&self) -> Result<&str> {
        self.id
            .get()
            .map(String::as_str)
            .ok_or_else(|| Error::upload("upload has not been started"))
    }

    async fn status(&self) -> Result<Option<()>> {
        let url = format!("{}/upload/{}", self.base_url, self.id()?);
        let resp: StatusResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(member = %self.config.member_address, status = %resp.status, "Polled upload");
        match resp.status.as_str() {
            "SUCCESS" => Ok(Some(())),
            "FAILURE" | "CANCELED" => Err(Error::upload(format!(
                "upload from {} ended with {}: {}",
                self.config.member_address,
                resp.status,
                resp.message.unwrap_or_default()
            ))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Upload for RestUpload {
    async fn start(&self, token: &CancellationToken) -> Result<()> {
        let request = self
            .http
            .post(format!("{}/upload", self.base_url))
            .json(&self.config)
            .send();
        let resp = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            resp = request => resp?,
        };
        let started: StartResponse = resp.error_for_status()?.json().await?;
        self.id
            .set(started.id)
            .map_err(|_| Error::upload("upload already started"))
    }

    async fn wait(&self, token: &CancellationToken) -> Result<()> {
        poll_until(token, self.poll_interval, || self.status()).await
    }

    async fn cancel(&self) -> Result<()> {
        let url = format!("{}/upload/{}", self.base_url, self.id()?);
        self.http.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
