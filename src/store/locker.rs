//! In-memory upload locking
//!
//! [`MemoryLocker`] keeps a table of locked upload IDs. It only coordinates
//! callers inside one process; several server instances sharing a backend
//! need an external lock service instead.
//!
//! Callers should prefer [`UploadLock`], which releases the lock when it goes
//! out of scope, over pairing `lock`/`unlock` by hand.

use super::{Locker, StoreComposer, StoreError, UseIn};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Lock table keyed by upload ID
#[derive(Debug, Default)]
pub struct MemoryLocker {
    locks: DashMap<String, ()>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.locks.contains_key(id)
    }

    /// Number of currently held locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Locker for MemoryLocker {
    fn lock(&self, id: &str) -> Result<(), StoreError> {
        match self.locks.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::LockConflict(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(())
            }
        }
    }

    fn unlock(&self, id: &str) {
        self.locks.remove(id);
    }
}

impl UseIn for MemoryLocker {
    fn use_in(self: Arc<Self>, composer: &mut StoreComposer) {
        composer.use_locker(self);
    }
}

/// Scoped lock on one upload, released on drop
pub struct UploadLock {
    locker: Arc<dyn Locker>,
    id: String,
}

impl UploadLock {
    /// Try to lock `id`, failing with [`StoreError::LockConflict`] if it is
    /// already held.
    pub fn acquire(locker: Arc<dyn Locker>, id: &str) -> Result<Self, StoreError> {
        locker.lock(id)?;
        Ok(Self {
            locker,
            id: id.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        self.locker.unlock(&self.id);
    }
}

impl std::fmt::Debug for UploadLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadLock").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_conflict() {
        let locker = MemoryLocker::new();
        locker.lock("a").unwrap();

        assert!(matches!(locker.lock("a"), Err(StoreError::LockConflict(id)) if id == "a"));
        assert!(locker.lock("b").is_ok());
        assert_eq!(locker.len(), 2);
    }

    #[test]
    fn test_unlock_then_relock() {
        let locker = MemoryLocker::new();
        locker.lock("a").unwrap();
        locker.unlock("a");

        assert!(!locker.is_locked("a"));
        assert!(locker.lock("a").is_ok());
    }

    #[test]
    fn test_double_unlock_is_noop() {
        let locker = MemoryLocker::new();
        locker.lock("a").unwrap();
        locker.unlock("a");
        locker.unlock("a");
        locker.unlock("never-locked");

        assert!(locker.is_empty());
    }

    #[test]
    fn test_guard_releases_on_error_path() {
        let locker = Arc::new(MemoryLocker::new());

        let result: Result<(), StoreError> = (|| {
            let _lock = UploadLock::acquire(locker.clone(), "a")?;
            Err(StoreError::Backend("write failed".into()))
        })();

        assert!(result.is_err());
        assert!(!locker.is_locked("a"));
    }
}
