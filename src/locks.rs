//! Per-key advisory locks.
//!
//! Rules uploads must not interleave for the same game, and chat generation
//! must not interleave for the same session. A lock is one async mutex per
//! key; distinct keys never contend. Entries live for the process lifetime,
//! bounded by the number of games/sessions touched.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold the lock for `key`. The guard releases on drop.
    pub async fn acquire(&self, key: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}
