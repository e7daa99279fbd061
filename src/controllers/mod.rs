//! Kubernetes controllers for the HotBackup CRD
//!
//! This module contains the controller wiring that watches for CRD changes
//! and hands each notification to the reconciler.

mod hot_backup_controller;

pub use hot_backup_controller::{error_policy, reconcile, run as run_hot_backup_controller};

use crate::reconcilers::HotBackupReconciler;

/// Shared context for the controller
pub struct Context {
    /// Reconciler owning run guard and schedules
    pub reconciler: HotBackupReconciler,
}

impl Context {
    /// Create a new context
    pub fn new(reconciler: HotBackupReconciler) -> Self {
        Self { reconciler }
    }
}
