//! Hazelcast Custom Resource Definition
//!
//! Only the fields the backup operator reads are modelled; the resource is
//! owned by the platform operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hazelcast cluster specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "hazelcast.com",
    version = "v1alpha1",
    kind = "Hazelcast",
    plural = "hazelcasts",
    singular = "hazelcast",
    namespaced,
    status = "HazelcastStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastSpec {
    /// Number of members
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,

    /// Persistence configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,
}

fn default_cluster_size() -> i32 {
    3
}

/// Persistence specification
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Base directory of the member's persistence store
    pub base_dir: String,

    /// Where completed backups end up
    #[serde(default)]
    pub backup_type: BackupType,
}

/// Backup placement
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupType {
    /// Backups stay on the member's volume
    #[default]
    Local,
    /// Backups are exported by the member's agent sidecar
    External,
}

impl HazelcastSpec {
    /// Whether completed member backups must be uploaded to object storage
    pub fn is_external(&self) -> bool {
        self.persistence
            .as_ref()
            .is_some_and(|p| !p.base_dir.is_empty() && p.backup_type == BackupType::External)
    }

    pub fn base_dir(&self) -> Option<&str> {
        self.persistence.as_ref().map(|p| p.base_dir.as_str())
    }
}

/// Cluster phase
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum HazelcastPhase {
    Pending,
    Running,
    Failed,
}

/// Hazelcast status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<HazelcastPhase>,

    /// Observed members
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<HazelcastMemberStatus>,
}

/// Observed state of one member
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastMemberStatus {
    /// host:port of the member
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default)]
    pub ready: bool,
}

impl Hazelcast {
    pub fn is_running(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .is_some_and(|p| p == HazelcastPhase::Running)
    }

    /// Addresses of all observed members
    pub fn member_addresses(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.members.iter().map(|m| m.address.clone()).collect())
            .unwrap_or_default()
    }
}
