//! Adapters between the reconciler and the systems it drives
//!
//! - `kube_store`: HotBackup and Hazelcast resources on the API server
//! - `agent`: cluster and member hot backup clients
//! - `upload`: per-member export to object storage

pub mod agent;
pub mod kube_store;
pub mod upload;

pub use agent::{ClusterBackup, ClusterConnector, MemberAgent, RestClusterConnector};
pub use kube_store::{KubeStore, ResourceStore};
pub use upload::{RestUploadFactory, Upload, UploadConfig, UploadFactory};
