//! In-flight correlations between dispatched commands and their webhooks.
//!
//! Entries are spread over independently locked shards keyed by operation id,
//! so webhooks for different operations do not contend. `take` removes the
//! entry under its shard lock: exactly one caller (a webhook or the expiry
//! sweep) wins an entry, and a second delivery finds nothing.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use cabinet_core::{GridId, MaterialId, OperationId, SensorId};
use cabinet_inventory::OperationKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrelation {
    pub operation: OperationId,
    pub kind: OperationKind,
    pub material: MaterialId,
    pub sensor: SensorId,
    pub grid: GridId,
    /// Capacity held on the grid until this operation settles.
    pub reserved: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingCorrelation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub const DEFAULT_SHARDS: usize = 16;

#[derive(Debug)]
pub struct PendingCorrelations {
    shards: Vec<Mutex<HashMap<OperationId, PendingCorrelation>>>,
}

impl Default for PendingCorrelations {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl PendingCorrelations {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, id: OperationId) -> &Mutex<HashMap<OperationId, PendingCorrelation>> {
        let idx = id.get().unsigned_abs() as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Register a correlation. Returns `false` (and keeps the existing entry)
    /// if the operation is already pending.
    pub fn insert(&self, pending: PendingCorrelation) -> bool {
        let mut shard = self.shard(pending.operation).lock().unwrap_or_else(PoisonError::into_inner);
        if shard.contains_key(&pending.operation) {
            return false;
        }
        shard.insert(pending.operation, pending);
        true
    }

    /// Atomically remove and return the entry for `id`.
    pub fn take(&self, id: OperationId) -> Option<PendingCorrelation> {
        self.shard(id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.shard(id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn drain_expired(&self, now: DateTime<Utc>) -> Vec<PendingCorrelation> {
        let mut expired = Vec::new();
        for shard in &self.shards {
            let mut map = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<_> = map
                .values()
                .filter(|p| p.is_expired(now))
                .map(|p| p.operation)
                .collect();
            expired.extend(ids.into_iter().filter_map(|id| map.remove(&id)));
        }
        expired.sort_by_key(|p| p.operation);
        expired
    }
}
