use crate::domain::types::AccountKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<AccountKey, Arc<Mutex<()>>>;

/// Per-account async mutexes serializing every mutation of one
/// (user, category) pair inside this process. Different keys never contend.
///
/// An entry lives only while someone holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct AccountLocks {
    locks: Arc<LockMap>,
}

/// Held account lock. Dropping the last guard for a key removes its entry.
#[derive(Debug)]
pub struct AccountGuard {
    key: AccountKey,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the mutex, so only an idle entry is removed.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &AccountKey) -> AccountGuard {
        // The map shard guard must be released before awaiting the mutex.
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        AccountGuard {
            key: key.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
