//! HotBackup Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation holding the content hash of the last successfully applied spec
pub const LAST_SUCCESSFUL_SPEC_ANNOTATION: &str = "hazelcast.com/last-successful-spec";

/// Finalizer guarding cleanup of schedule and run state
pub const FINALIZER_NAME: &str = "hazelcast.com/finalizer";

/// HotBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hazelcast.com",
    version = "v1alpha1",
    kind = "HotBackup",
    plural = "hotbackups",
    singular = "hotbackup",
    shortname = "hb",
    namespaced,
    status = "HotBackupStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Message", "type": "string", "jsonPath": ".status.message"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HotBackupSpec {
    /// Name of the Hazelcast resource to back up
    pub hazelcast_resource_name: String,

    /// Cron schedule for recurring backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Object storage destination (e.g. s3://bucket/path)
    #[serde(
        default,
        rename = "bucketURI",
        skip_serializing_if = "Option::is_none"
    )]
    pub bucket_uri: Option<String>,

    /// Secret holding the object storage credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl HotBackupSpec {
    /// Whether this request is driven by the recurrence scheduler
    pub fn is_scheduled(&self) -> bool {
        self.schedule.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Lifecycle state of a HotBackup
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum HotBackupState {
    #[default]
    #[serde(alias = "")]
    Unset,
    Pending,
    InProgress,
    Success,
    Failure,
}

impl HotBackupState {
    /// Pending or InProgress
    pub fn is_running(self) -> bool {
        matches!(self, HotBackupState::Pending | HotBackupState::InProgress)
    }

    /// Success or Failure
    pub fn is_finished(self) -> bool {
        matches!(self, HotBackupState::Success | HotBackupState::Failure)
    }
}

impl std::fmt::Display for HotBackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HotBackupState::Unset => "Unset",
            HotBackupState::Pending => "Pending",
            HotBackupState::InProgress => "InProgress",
            HotBackupState::Success => "Success",
            HotBackupState::Failure => "Failure",
        };
        f.write_str(s)
    }
}

/// HotBackup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotBackupStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: HotBackupState,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HotBackup {
    /// Current lifecycle state, `Unset` when no status was written yet
    pub fn state(&self) -> HotBackupState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Hash recorded for the last successfully applied spec
    pub fn last_applied_hash(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LAST_SUCCESSFUL_SPEC_ANNOTATION))
            .map(String::as_str)
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|n| n == FINALIZER_NAME))
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
