//! Per-key mutual exclusion.
//!
//! Stock rows are read-modified-written under the lock for their
//! (material, grid) key; unrelated keys never wait on each other. Idle locks
//! are dropped from the table once nobody holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only handed out under the table lock, so a count of two
        // (table + ours) means no one else holds or waits on this key.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            table.remove(&key);
        }
        result
    }

    /// Keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
