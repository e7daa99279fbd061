//! Recurring backup triggers
//!
//! One live trigger per HotBackup identity. Each trigger is a tokio task that
//! sleeps until the next cron instant and spawns the run body; firings are
//! not serialized against each other.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crd::ResourceKey;
use crate::error::{Error, Result};
use crate::metrics;

/// Work invoked on every firing
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Parse a five- or six-field cron expression.
///
/// The `cron` crate expects a leading seconds field, so classic five-field
/// expressions fire at second zero.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {}", trimmed),
        _ => trimmed.to_string(),
    };
    Schedule::from_str(&normalized).map_err(|e| Error::schedule(expr, e))
}

struct ScheduleEntry {
    schedule: String,
    token: CancellationToken,
}

/// Identity → live trigger map
pub struct Scheduler {
    entries: Mutex<HashMap<ResourceKey, ScheduleEntry>>,
    root: CancellationToken,
}

impl Scheduler {
    /// Triggers stop when `root` is cancelled
    pub fn new(root: CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            root,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKey, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install or replace the trigger for `key`.
    ///
    /// The previous trigger is cancelled before the new one is registered.
    /// On a parse error nothing changes.
    pub fn install(&self, key: &ResourceKey, schedule: &str, job: Job) -> Result<()> {
        let parsed = parse_schedule(schedule)?;
        let token = self.root.child_token();

        let mut entries = self.lock();
        if let Some(old) = entries.remove(key) {
            debug!(backup = %key, schedule = %old.schedule, "Replacing schedule");
            old.token.cancel();
        }
        tokio::spawn(trigger_loop(key.clone(), parsed, job, token.clone()));
        entries.insert(
            key.clone(),
            ScheduleEntry {
                schedule: schedule.to_string(),
                token,
            },
        );
        metrics::SCHEDULED_BACKUPS.set(entries.len() as f64);

        info!(backup = %key, schedule = %schedule, "Backup schedule installed");
        Ok(())
    }

    /// Cancel and drop the trigger for `key`. Returns whether one existed.
    pub fn remove(&self, key: &ResourceKey) -> bool {
        let mut entries = self.lock();
        let removed = entries.remove(key);
        metrics::SCHEDULED_BACKUPS.set(entries.len() as f64);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                info!(backup = %key, schedule = %entry.schedule, "Backup schedule removed");
                true
            }
            None => false,
        }
    }

    /// Schedule string of the live trigger for `key`
    pub fn schedule_of(&self, key: &ResourceKey) -> Option<String> {
        self.lock().get(key).map(|e| e.schedule.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.lock().values() {
            entry.token.cancel();
        }
    }
}

async fn trigger_loop(key: ResourceKey, schedule: Schedule, job: Job, token: CancellationToken) {
    let mut last: DateTime<Utc> = Utc::now();
    loop {
        let Some(next) = schedule.after(&last).next() else {
            warn!(backup = %key, "Schedule has no upcoming time, trigger stopped");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        info!(backup = %key, scheduled_for = %next, "Scheduled backup triggered");
        tokio::spawn(job());
        last = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        Arc::new(move || -> BoxFuture<'static, ()> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn parses_five_and_six_field_expressions() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("0 * * * *").is_ok());
        assert!(parse_schedule("30 0 * * * *").is_ok());
        let err = parse_schedule("every tuesday").unwrap_err();
        assert!(matches!(err, Error::Schedule { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_leaves_one_live_trigger() {
        let scheduler = Scheduler::new(CancellationToken::new());
        let key = ResourceKey::new("ns", "hb3");
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));

        scheduler
            .install(&key, "*/5 * * * *", counting_job(old.clone()))
            .unwrap();
        scheduler
            .install(&key, "0 * * * *", counting_job(new.clone()))
            .unwrap();

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.schedule_of(&key).as_deref(), Some("0 * * * *"));

        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert!(new.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn invalid_schedule_keeps_previous_entry() {
        let scheduler = Scheduler::new(CancellationToken::new());
        let key = ResourceKey::new("ns", "hb");
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .install(&key, "0 * * * *", counting_job(counter.clone()))
            .unwrap();
        assert!(scheduler
            .install(&key, "not a schedule", counting_job(counter))
            .is_err());
        assert_eq!(scheduler.schedule_of(&key).as_deref(), Some("0 * * * *"));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_trigger_never_fires() {
        let scheduler = Scheduler::new(CancellationToken::new());
        let key = ResourceKey::new("ns", "hb");
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .install(&key, "*/5 * * * *", counting_job(counter.clone()))
            .unwrap();
        assert!(scheduler.remove(&key));
        assert!(!scheduler.remove(&key));
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
