//! Exclusivity marker for directly triggered runs

use std::collections::HashSet;
use std::sync::Mutex;

use crate::crd::ResourceKey;

/// Set of identities with a directly triggered run in flight.
///
/// Scheduled runs are tracked by the scheduler and never enter this set.
#[derive(Debug, Default)]
pub struct RunGuard {
    active: Mutex<HashSet<ResourceKey>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns false when it is already held.
    pub fn try_acquire(&self, key: &ResourceKey) -> bool {
        self.lock().insert(key.clone())
    }

    /// Release `key`; a no-op when it is not held
    pub fn release(&self, key: &ResourceKey) -> bool {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<ResourceKey>> {
        // a panic while holding the lock cannot leave the set half-updated
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
