//! Per-unit serialization.
//!
//! All work on one logical unit (keyed by name, which survives a recreate)
//! holds that unit's async mutex. The poll cycle only ever tries the lock;
//! operator commands wait a bounded time.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type UnitGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct UnitLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the lock if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<UnitGuard> {
        self.lock_for(key).try_lock_owned().ok()
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire_within(&self, key: &str, timeout: Duration) -> Option<UnitGuard> {
        tokio::time::timeout(timeout, self.lock_for(key).lock_owned())
            .await
            .ok()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Forget locks for keys no longer in use that nobody holds.
    pub fn retain(&self, live: &std::collections::HashSet<String>) {
        self.locks
            .retain(|key, lock| live.contains(key) || Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_try_acquire_skips_held_unit() {
        let locks = UnitLocks::new();
        let guard = locks.try_acquire("auth-service").unwrap();
        assert!(locks.try_acquire("auth-service").is_none());
        assert!(locks.try_acquire("payments-worker").is_some());
        drop(guard);
        assert!(locks.try_acquire("auth-service").is_some());
    }

    #[tokio::test]
    async fn test_acquire_within_times_out() {
        let locks = UnitLocks::new();
        let _guard = locks.try_acquire("auth-service").unwrap();
        let waited = locks
            .acquire_within("auth-service", Duration::from_millis(20))
            .await;
        assert!(waited.is_none());
        assert!(locks.is_held("auth-service"));
    }

    #[tokio::test]
    async fn test_retain_keeps_held_locks() {
        let locks = UnitLocks::new();
        let _held = locks.try_acquire("gone-but-busy").unwrap();
        drop(locks.try_acquire("gone"));
        drop(locks.try_acquire("live"));
        let live: HashSet<String> = ["live".to_string()].into_iter().collect();
        locks.retain(&live);
        assert_eq!(locks.len(), 2);
        assert!(locks.is_held("gone-but-busy"));
    }
}
