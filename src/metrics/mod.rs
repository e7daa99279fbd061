//! Prometheus metrics for the Hot Backup Operator
//!
//! This module exposes metrics for monitoring operator health and performance.

mod prometheus;

pub use prometheus::*;
