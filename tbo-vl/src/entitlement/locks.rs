//! Per-(user, content) write serialization within one process
//!
//! Writers for the same key queue on an async mutex; different keys never
//! contend. Entries are held weakly and pruned as they go idle. The
//! `row_version` check in the store still catches writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type Key = (Uuid, Uuid);

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<Key, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `(user_id, content_id)`
    pub async fn lock(&self, user_id: Uuid, content_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self.entry((user_id, content_id));
        mutex.lock_owned().await
    }

    fn entry(&self, key: Key) -> Arc<AsyncMutex<()>> {
        // A poisoned map only means another thread panicked mid-insert; the
        // map itself is still usable.
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        map.retain(|_, weak| weak.strong_count() > 0);
        let mutex = Arc::new(AsyncMutex::new(()));
        map.insert(key, Arc::downgrade(&mutex));
        mutex
    }

    /// Keys with a live lock holder or waiter
    pub fn active_keys(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
