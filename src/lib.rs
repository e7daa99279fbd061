//! OSO Hot Backup Kubernetes Operator
//!
//! This operator orchestrates distributed hot backups of Hazelcast clusters
//! in Kubernetes, driven by the `HotBackup` Custom Resource Definition.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
