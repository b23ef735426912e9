//! Reference-counted shutdown coordination for stream workers.

use crossbeam::sync::WaitGroup;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks a group of workers so the owner can wait for all of them to exit.
pub struct ShutdownGroup {
    wait_group: WaitGroup,
    active: Arc<AtomicUsize>,
}

/// Held by one worker; dropping it is that worker's single decrement.
pub struct WorkerGuard {
    _wait_group: WaitGroup,
    active: Arc<AtomicUsize>,
}

impl ShutdownGroup {
    pub fn new() -> Self {
        Self {
            wait_group: WaitGroup::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add one worker to the group
    pub fn enlist(&self) -> WorkerGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            _wait_group: self.wait_group.clone(),
            active: self.active.clone(),
        }
    }

    /// Number of guards not yet released
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Block until every guard has been released
    pub fn wait(self) {
        self.wait_group.wait();
    }
}

impl Default for ShutdownGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ShutdownGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownGroup")
            .field("active", &self.active())
            .finish()
    }
}

impl std::fmt::Debug for WorkerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGuard").finish_non_exhaustive()
    }
}
