//! Upload Locker Integration Tests
//!
//! Fail-fast exclusive locking across threads and through the composer.

#[cfg(test)]
mod tests {
    use mizuchi_store::store::{
        Locker, MemoryLocker, MemoryStore, StoreComposer, StoreError, UploadLock, UseIn,
    };
    use std::sync::{Arc, Barrier};

    // ========================================================================
    // TEST: Mutual exclusion
    // ========================================================================

    /// Two callers racing for the same ID: exactly one wins
    #[test]
    fn test_concurrent_lock_single_winner() {
        for _ in 0..50 {
            let locker = Arc::new(MemoryLocker::new());
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let locker = locker.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        locker.lock("upload-1")
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let wins = results.iter().filter(|r| r.is_ok()).count();
            let conflicts = results
                .iter()
                .filter(|r| matches!(r, Err(StoreError::LockConflict(_))))
                .count();
            assert_eq!(wins, 1);
            assert_eq!(conflicts, 1);

            locker.unlock("upload-1");
            assert!(locker.lock("upload-1").is_ok());
        }
    }

    /// Many IDs locked concurrently do not interfere with each other
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_ids_do_not_conflict() {
        let locker = Arc::new(MemoryLocker::new());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let locker = locker.clone();
                tokio::spawn(async move { locker.lock(&format!("upload-{}", i)) })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(locker.len(), 64);
    }

    // ========================================================================
    // TEST: Scoped release
    // ========================================================================

    /// Guards release on drop, including when moved into a finished task
    #[tokio::test]
    async fn test_guard_released_when_task_ends() {
        let locker = Arc::new(MemoryLocker::new());

        let guard = UploadLock::acquire(locker.clone(), "upload-1").unwrap();
        assert_eq!(guard.id(), "upload-1");

        tokio::spawn(async move {
            let _held = guard;
        })
        .await
        .unwrap();

        assert!(!locker.is_locked("upload-1"));
    }

    /// A panicking holder still releases its lock
    #[test]
    fn test_guard_released_on_panic() {
        let locker = Arc::new(MemoryLocker::new());
        let inner = locker.clone();

        let result = std::thread::spawn(move || {
            let _lock = UploadLock::acquire(inner, "upload-1").unwrap();
            panic!("writer crashed");
        })
        .join();

        assert!(result.is_err());
        assert!(!locker.is_locked("upload-1"));
    }

    // ========================================================================
    // TEST: Composer integration
    // ========================================================================

    /// Without a registered locker, lock_upload degrades to no locking
    #[test]
    fn test_composer_without_locker_degrades() {
        let mut composer = StoreComposer::new();
        Arc::new(MemoryStore::new()).use_in(&mut composer);

        assert!(composer.lock_upload("a").unwrap().is_none());
        assert!(composer.lock_upload("a").unwrap().is_none());
    }

    /// Composer locks go through the registered locker
    #[test]
    fn test_composer_uses_registered_locker() {
        let locker = Arc::new(MemoryLocker::new());
        let mut composer = StoreComposer::new();
        locker.clone().use_in(&mut composer);

        let guard = composer.lock_upload("a").unwrap();
        assert!(locker.is_locked("a"));
        assert!(matches!(
            locker.lock("a"),
            Err(StoreError::LockConflict(_))
        ));

        drop(guard);
        assert!(locker.is_empty());
    }
}
