//! Process-wide exclusive lock over the workspace.
//!
//! Held by every workspace-writing execution and by rollback, so a checkout
//! never races a sandboxed writer.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Cloneable handle to the workspace lock.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLock {
    inner: Arc<Mutex<()>>,
}

/// Proof of exclusive workspace access. Released on drop.
pub type WorkspaceGuard = OwnedMutexGuard<()>;

impl WorkspaceLock {
    /// A new, unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access.
    pub async fn acquire(&self) -> WorkspaceGuard {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Takes the lock if it is free.
    #[must_use]
    pub fn try_acquire(&self) -> Option<WorkspaceGuard> {
        Arc::clone(&self.inner).try_lock_owned().ok()
    }

    /// True if someone holds the lock right now.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive() {
        let lock = WorkspaceLock::new();
        let clone = lock.clone();

        let guard = lock.acquire().await;
        assert!(clone.is_locked());
        assert!(clone.try_acquire().is_none());

        drop(guard);
        assert!(!clone.is_locked());
        assert!(clone.try_acquire().is_some());
    }
}
