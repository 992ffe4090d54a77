//! Single-flight run lock for the pipelines.
//!
//! The device's [`crate::HistoryStore`] owns one [`RunLock`] per pipeline
//! kind. A run acquires it without waiting; a second run while the guard is
//! alive is rejected instead of queued.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Non-blocking exclusive lock held for the lifetime of a run.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunLock {
    inner: Arc<Mutex<()>>,
}

/// Guard that holds the run lock until dropped.
#[derive(Debug)]
pub(crate) struct RunGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RunLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// Returns `None` while another guard is alive.
    pub(crate) fn try_acquire(&self) -> Option<RunGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| RunGuard { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let lock = RunLock::new();
        let guard = lock.try_acquire().expect("first acquire");
        assert!(lock.try_acquire().is_none());
        assert!(lock.clone().try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
