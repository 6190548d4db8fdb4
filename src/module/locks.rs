use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Error, Result};

type LockKey = (i64, String);

/// Advisory locks serialising imports of one (module-provider, version).
#[derive(Debug, Default)]
pub struct ImportLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one import. Dropping it releases the lock.
pub struct ImportGuard {
    key: LockKey,
    registry: Arc<ImportLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.registry.release_if_idle(&self.key);
    }
}

impl ImportLocks {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entry(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn busy(module_provider_id: i64, version: &str) -> Error {
        Error::conflict(format!(
            "An import of version {version} for module provider {module_provider_id} is already in progress"
        ))
    }

    /// Drops the map entry once nothing but the map references it.
    fn release_if_idle(&self, key: &LockKey) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }

    /// Fails immediately with `Conflict` when another import holds the lock.
    pub fn try_acquire(self: &Arc<Self>, module_provider_id: i64, version: &str) -> Result<ImportGuard> {
        let key = (module_provider_id, version.to_string());
        match self.entry(&key).try_lock_owned() {
            Ok(guard) => Ok(ImportGuard {
                key,
                registry: Arc::clone(self),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(&key);
                Err(Self::busy(module_provider_id, version))
            }
        }
    }

    /// Waits up to `timeout` for the lock, then fails with `Conflict`.
    pub async fn acquire(
        self: &Arc<Self>,
        module_provider_id: i64,
        version: &str,
        timeout: Duration,
    ) -> Result<ImportGuard> {
        let key = (module_provider_id, version.to_string());
        let lock = self.entry(&key);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(ImportGuard {
                key,
                registry: Arc::clone(self),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(&key);
                Err(Self::busy(module_provider_id, version))
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_conflicts_while_held() {
        let locks = ImportLocks::new();
        let first = locks.try_acquire(1, "1.0.0").unwrap();
        assert!(matches!(locks.try_acquire(1, "1.0.0"), Err(Error::Conflict(_))));
        assert!(locks.try_acquire(1, "1.0.1").is_ok());
        drop(first);
        assert!(locks.try_acquire(1, "1.0.0").is_ok());
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let locks = ImportLocks::new();
        let _held = locks.try_acquire(7, "2.0.0").unwrap();
        let err = locks
            .acquire(7, "2.0.0", Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = ImportLocks::new();
        let held = locks.try_acquire(3, "1.0.0").unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(3, "1.0.0", Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_entries_are_removed() {
        let locks = ImportLocks::new();
        {
            let _a = locks.try_acquire(1, "1.0.0").unwrap();
            let _b = locks.try_acquire(2, "1.0.0").unwrap();
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }
}
