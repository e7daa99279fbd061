//! Custom Resource Definitions for the Hot Backup Operator

mod hazelcast;
mod hot_backup;

pub use hazelcast::*;
pub use hot_backup::*;

use std::fmt;

use kube::{CustomResourceExt, ResourceExt};

/// Namespace-qualified identity of a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, falling back to the `default` namespace
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    /// Key of a sibling resource in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Generate all CRD YAML manifests owned by this operator
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&HotBackup::crd()).unwrap()]
}
