//! Reconcilers for the HotBackup CRD
//!
//! This module contains the backup reconciliation engine:
//! - `hot_backup`: the level-triggered state machine
//! - `run`: the run body fanning out one monitor per member
//! - `session`: per-run cluster handle and shared cancellation scope
//! - `schedule`: recurring triggers for scheduled backups
//! - `run_guard`: exclusivity of directly triggered runs
//! - `status`: conflict-tolerant status and metadata writes

pub mod hot_backup;
pub mod run;
pub mod run_guard;
pub mod schedule;
pub mod session;
pub mod status;

pub use hot_backup::HotBackupReconciler;
pub use run::RunTrigger;
pub use run_guard::RunGuard;
pub use schedule::{parse_schedule, Job, Scheduler};
pub use session::{ClusterBackupSession, MemberBackupTask};
pub use status::{retry_on_conflict, spec_hash, RetryConfig, StatusStore};
