//! Per-project mutual exclusion.
//!
//! Compound writes (full section replace, milestone append) take the
//! project's lock for their whole duration. Locks are created lazily and
//! never shared between projects, so unrelated projects never wait on each
//! other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Guard for one project's lock. The lock is released when it drops, on
/// every exit path.
pub type ProjectGuard = OwnedMutexGuard<()>;

/// Lazily-populated registry of per-project async locks.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `project_id`.
    pub async fn acquire(&self, project_id: Uuid) -> ProjectGuard {
        let lock = self.lock_for(project_id);
        lock.lock_owned().await
    }

    /// Try to take the lock without waiting.
    pub fn try_acquire(&self, project_id: Uuid) -> Option<ProjectGuard> {
        self.lock_for(project_id).try_lock_owned().ok()
    }

    /// Drop registry entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let mut locks = self.registry();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Number of projects with a registered lock.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, project_id: Uuid) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.registry().entry(project_id).or_default())
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
        // The map holds no invariants a panicking holder could break.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
