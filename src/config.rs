//! Operator configuration
//!
//! Every setting can be given as a flag or through the environment.

use std::time::Duration;

use clap::Parser;

use crate::reconcilers::RetryConfig;

/// OSO Hot Backup Operator
#[derive(Parser, Debug, Clone)]
#[command(name = "hot-backup-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Port serving /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Port of the backup agent sidecar on every member
    #[arg(long, env = "AGENT_PORT", default_value_t = 8443)]
    pub agent_port: u16,

    /// Interval between member and upload state polls, in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Timeout for a single REST call to a member or agent, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Attempts for a conflicting status write, including the first
    #[arg(long, env = "STATUS_RETRY_STEPS", default_value_t = 5)]
    pub status_retry_steps: u32,

    /// Delay before retrying a conflicting status write, in milliseconds
    #[arg(long, env = "STATUS_RETRY_BACKOFF_MS", default_value_t = 10)]
    pub status_retry_backoff_ms: u64,

    /// Time in-flight backups get to record their outcome on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Only watch HotBackups in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl OperatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            steps: self.status_retry_steps.max(1),
            initial_backoff: Duration::from_millis(self.status_retry_backoff_ms),
            ..RetryConfig::default()
        }
    }
}
