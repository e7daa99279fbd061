//! Error types for the Hot Backup Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource disappeared between notification and fetch
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency write collision
    #[error("Conflict writing {0}: the object has been modified")]
    Conflict(String),

    /// Target cluster absent or not ready
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Member backup agent error
    #[error("Member backup error: {0}")]
    Agent(String),

    /// Upload agent error
    #[error("Upload error: {0}")]
    Upload(String),

    /// Operation stopped because its run was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Unparseable cron schedule
    #[error("Invalid schedule '{schedule}': {reason}")]
    Schedule { schedule: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Create a member agent error
    pub fn agent(msg: impl Into<String>) -> Self {
        Error::Agent(msg.into())
    }

    /// Create an upload error
    pub fn upload(msg: impl Into<String>) -> Self {
        Error::Upload(msg.into())
    }

    /// Create a schedule parse error
    pub fn schedule(schedule: impl Into<String>, reason: impl ToString) -> Self {
        Error::Schedule {
            schedule: schedule.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is a write conflict that may be retried
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Whether this error only reports cancellation of the surrounding run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
