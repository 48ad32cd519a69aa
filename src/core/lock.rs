//! Non-reentrant run guard keyed on the destination root.
//!
//! An on-demand batch and a scheduled batch must never write into the same
//! destination root at the same time. Acquiring the lock for a root that is
//! already held fails immediately instead of waiting.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct RunLocks {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim `root`. Returns `None` while another run holds it.
    pub fn try_acquire(&self, root: &Path) -> Option<RunGuard> {
        let key = lock_key(root);
        if !self.lock_set().insert(key.clone()) {
            return None;
        }
        Some(RunGuard {
            locks: self.clone(),
            key,
        })
    }

    pub fn is_running(&self, root: &Path) -> bool {
        self.lock_set().contains(&lock_key(root))
    }

    /// Whether any root is held, whatever the configuration says now.
    pub fn any_running(&self) -> bool {
        !self.lock_set().is_empty()
    }

    fn lock_set(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_key(root: &Path) -> PathBuf {
    std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Releases the destination root when dropped.
pub struct RunGuard {
    locks: RunLocks,
    key: PathBuf,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.lock_set().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let locks = RunLocks::new();
        let root = Path::new("/srv/backups");

        let guard = locks.try_acquire(root).unwrap();
        assert!(locks.is_running(root));
        assert!(locks.try_acquire(root).is_none());

        drop(guard);
        assert!(!locks.is_running(root));
        assert!(locks.try_acquire(root).is_some());
    }

    #[test]
    fn test_distinct_roots_do_not_conflict() {
        let locks = RunLocks::new();
        let _a = locks.try_acquire(Path::new("/srv/a")).unwrap();
        assert!(locks.try_acquire(Path::new("/srv/b")).is_some());
    }

    #[test]
    fn test_any_running_follows_held_roots() {
        let locks = RunLocks::new();
        assert!(!locks.any_running());

        let guard = locks.try_acquire(Path::new("/srv/old")).unwrap();
        assert!(locks.any_running());
        assert!(!locks.is_running(Path::new("/srv/new")));

        drop(guard);
        assert!(!locks.any_running());
    }

    #[test]
    fn test_relative_and_absolute_forms_share_a_lock() {
        let locks = RunLocks::new();
        let cwd = std::env::current_dir().unwrap();
        let _guard = locks.try_acquire(Path::new("Backup")).unwrap();
        assert!(locks.try_acquire(&cwd.join("Backup")).is_none());
    }
}
