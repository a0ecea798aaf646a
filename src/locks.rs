//! Keyed async locks
//!
//! Serializes work per key (volume name, target path) without a global lock.
//! Entries exist only while someone holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Registry of per-key mutexes
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self.inner.entry(key.to_string()).or_default().value().clone();
        let guard = mutex.lock_owned().await;

        KeyedGuard {
            map: self.inner.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one key; released on drop
#[derive(Debug)]
pub struct KeyedGuard {
    map: Arc<LockMap>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference is not counted
        self.guard.take();
        self.map
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
