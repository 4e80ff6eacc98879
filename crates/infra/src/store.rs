//! Operation and stock storage collaborators.
//!
//! Persistence proper lives outside the core; these traits are the boundary
//! and the in-memory implementations back tests, dev runs and single-process
//! deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use cabinet_core::{DomainError, DomainResult, Entity, GridId, OperationId};
use cabinet_inventory::{Operation, OperationDraft, Stock, StockKey};

/// Closure applied to an operation under the store's write lock.
pub type OperationUpdate<'a> = &'a mut dyn FnMut(&mut Operation) -> DomainResult<()>;

pub trait OperationStore: Send + Sync {
    /// Persist a new `pending` operation; the store assigns its id.
    fn create(&self, draft: OperationDraft, now: DateTime<Utc>) -> Operation;

    fn get(&self, id: OperationId) -> Option<Operation>;

    /// Read-modify-write one operation atomically. Nothing is written when
    /// `apply` fails.
    fn update(&self, id: OperationId, apply: OperationUpdate<'_>) -> DomainResult<Operation>;

    fn list(&self) -> Vec<Operation>;
}

impl<S> OperationStore for Arc<S>
where
    S: OperationStore + ?Sized,
{
    fn create(&self, draft: OperationDraft, now: DateTime<Utc>) -> Operation {
        (**self).create(draft, now)
    }

    fn get(&self, id: OperationId) -> Option<Operation> {
        (**self).get(id)
    }

    fn update(&self, id: OperationId, apply: OperationUpdate<'_>) -> DomainResult<Operation> {
        (**self).update(id, apply)
    }

    fn list(&self) -> Vec<Operation> {
        (**self).list()
    }
}

/// Stock rows keyed by (material, grid).
pub trait StockLedger: Send + Sync {
    fn get(&self, key: &StockKey) -> Option<Stock>;

    fn upsert(&self, stock: Stock);

    fn remove(&self, key: &StockKey) -> Option<Stock>;

    fn list_for_grid(&self, grid: GridId) -> Vec<Stock>;

    /// Sum of stock held by one grid across materials.
    fn grid_total(&self, grid: GridId) -> i64 {
        self.list_for_grid(grid).iter().map(|s| s.qty).sum()
    }
}

impl<S> StockLedger for Arc<S>
where
    S: StockLedger + ?Sized,
{
    fn get(&self, key: &StockKey) -> Option<Stock> {
        (**self).get(key)
    }

    fn upsert(&self, stock: Stock) {
        (**self).upsert(stock)
    }

    fn remove(&self, key: &StockKey) -> Option<Stock> {
        (**self).remove(key)
    }

    fn list_for_grid(&self, grid: GridId) -> Vec<Stock> {
        (**self).list_for_grid(grid)
    }

    fn grid_total(&self, grid: GridId) -> i64 {
        (**self).grid_total(grid)
    }
}

#[derive(Debug)]
pub struct InMemoryOperationStore {
    next_id: AtomicI64,
    inner: RwLock<HashMap<OperationId, Operation>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn create(&self, draft: OperationDraft, now: DateTime<Utc>) -> Operation {
        let id = OperationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let op = Operation::new(id, draft, now);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*op.id(), op.clone());
        op
    }

    fn get(&self, id: OperationId) -> Option<Operation> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn update(&self, id: OperationId, apply: OperationUpdate<'_>) -> DomainResult<Operation> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let stored = map
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("operation {id}")))?;

        let mut next = stored.clone();
        apply(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    fn list(&self) -> Vec<Operation> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut ops: Vec<_> = map.values().cloned().collect();
        ops.sort_by_key(|o| o.id);
        ops
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    inner: RwLock<HashMap<StockKey, Stock>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = Stock>) -> Self {
        let ledger = Self::new();
        for row in rows {
            ledger.upsert(row);
        }
        ledger
    }
}

// Writers never leave a row half-updated, so a poisoned lock still guards a
// consistent map.
impl StockLedger for InMemoryStockLedger {
    fn get(&self, key: &StockKey) -> Option<Stock> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn upsert(&self, stock: Stock) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*stock.id(), stock);
    }

    fn remove(&self, key: &StockKey) -> Option<Stock> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    fn list_for_grid(&self, grid: GridId) -> Vec<Stock> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<_> = map.values().filter(|s| s.key.grid == grid).cloned().collect();
        rows.sort_by_key(|s| s.key);
        rows
    }
}
