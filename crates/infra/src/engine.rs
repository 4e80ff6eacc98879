//! Reconciliation engine: hardware command dispatch and webhook correlation.
//!
//! Every stock operation follows the same path:
//!
//! ```text
//! request
//!   ↓
//! 1. resolve the material's sensor binding (exactly one)
//!   ↓
//! 2. allocate a grid and, for inbound kinds, reserve capacity on it
//!   ↓
//! 3. resolve the (grid, sensor) channel
//!   ↓
//! 4. persist the operation (`pending`) + register its correlation
//!   ↓
//! 5. post the hardware command (`dispatched`, or `failed` on gateway error)
//!   ⋮  (the gateway weighs the grid when the door closes)
//! 6. webhook: take the correlation, infer the count, write stock under the
//!    (material, grid) lock, settle the operation, publish the change
//! ```
//!
//! Correlations carry a deadline. The sweep closes the ones whose webhook
//! never arrived and frees their reservations, so a lost callback cannot pin
//! grid capacity forever.
//!
//! Webhook failures are reported as errors for logging, but the HTTP layer
//! acknowledges them: the gateway does not retry, and a duplicate or stale
//! delivery must not change state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use cabinet_core::{
    AccountId, BoxId, DomainError, GridId, MaterialId, OperationId, SensorId,
};
use cabinet_events::{EventBus, Notification, NotificationEnvelope};
use cabinet_inventory::{
    AllocationError, Grid, HW_OP_WEIGH, MissingStockPolicy, Operation, OperationDraft, OperationKind,
    OperationStatus, SlotAllocator, Stock, StockKey, StockTransition, StockWrite,
    sort_outbound_candidates,
};

use crate::catalog::{CalibrationSource, CatalogError, GridCatalog};
use crate::correlation::{DEFAULT_SHARDS, PendingCorrelation, PendingCorrelations};
use crate::gateway::{GatewayAction, GatewayError, HardwareCommand, HardwareGateway};
use crate::locks::KeyedLocks;
use crate::store::{OperationStore, StockLedger};

/// Correlation token the gateway sends when a weighing was not requested by us.
pub const UNDEFINED_TOKEN: &str = "undefined";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("no slot available for material {0}")]
    NoSlotAvailable(MaterialId),

    #[error("material {material} must be bound to exactly one sensor, found {found}")]
    SensorBinding { material: MaterialId, found: usize },

    #[error("grid {grid} has no channel for sensor {sensor}")]
    ChannelNotBound { grid: GridId, sensor: SensorId },

    #[error("grid {0} filled up during allocation, retry")]
    AllocationRace(GridId),

    #[error("hardware dispatch failed: {0}")]
    Dispatch(#[from] GatewayError),

    #[error("no pending operation for token {0:?}")]
    CorrelationNotFound(String),

    #[error("no stock for material {material} in grid {grid}")]
    StockNotFound { material: MaterialId, grid: GridId },

    #[error("no calibration for material {material} on sensor {sensor}")]
    Calibration { material: MaterialId, sensor: SensorId },
}

impl From<AllocationError> for EngineError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::NoSlotAvailable(material) => EngineError::NoSlotAvailable(material),
            AllocationError::UnsupportedKind(kind) => EngineError::Domain(DomainError::validation(
                format!("{kind} operations are not opened per material"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a dispatched command may wait for its webhook.
    pub pending_ttl: Duration,
    pub missing_stock: MissingStockPolicy,
    /// Shards of the correlation table.
    pub shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(300),
            missing_stock: MissingStockPolicy::default(),
            shards: DEFAULT_SHARDS,
        }
    }
}

impl EngineConfig {
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn with_missing_stock(mut self, policy: MissingStockPolicy) -> Self {
        self.missing_stock = policy;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineParts {
    pub operations: Arc<dyn OperationStore>,
    pub stock: Arc<dyn StockLedger>,
    pub catalog: Arc<dyn GridCatalog>,
    pub calibration: Arc<dyn CalibrationSource>,
    pub gateway: Arc<dyn HardwareGateway>,
}

/// A stock-in, stock-out or recycle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRequest {
    pub account: Option<AccountId>,
    pub material: MaterialId,
    pub kind: OperationKind,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedOperation {
    pub operation_id: OperationId,
    pub grid_id: GridId,
    pub channel: i64,
}

/// Webhook body sent by the hardware gateway. Every field is optional on the
/// wire; absent fields take their zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookPayload {
    pub uuid: String,
    pub box_id: i64,
    pub grid_id: i64,
    pub operation: i64,
    pub weight: i64,
    pub door_status: i64,
    pub light_status: i64,
    pub door_status_list: Value,
    pub card: String,
    pub code: String,
    pub finger: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A weigh-only reading; published, nothing reconciled.
    WeighOnly,
    Reconciled(Operation),
    Checked(Operation),
}

/// Parse a webhook correlation token. Empty, `"undefined"` and non-numeric
/// tokens correlate with nothing.
pub fn parse_token(token: &str) -> Option<OperationId> {
    let token = token.trim();
    if token.is_empty() || token == UNDEFINED_TOKEN {
        return None;
    }
    token.parse().ok()
}

pub struct ReconciliationEngine<B> {
    parts: EngineParts,
    bus: B,
    config: EngineConfig,
    pending: PendingCorrelations,
    stock_locks: KeyedLocks<StockKey>,
}

impl<B> ReconciliationEngine<B> {
    pub fn new(parts: EngineParts, bus: B, config: EngineConfig) -> Self {
        let pending = PendingCorrelations::new(config.shards);
        Self {
            parts,
            bus,
            config,
            pending,
            stock_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn operation(&self, id: OperationId) -> Option<Operation> {
        self.parts.operations.get(id)
    }

    pub fn stock(&self, key: &StockKey) -> Option<Stock> {
        self.parts.stock.get(key)
    }

    /// Correlations still waiting for a webhook.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: OperationId) -> bool {
        self.pending.contains(id)
    }
}

impl<B> ReconciliationEngine<B>
where
    B: EventBus<NotificationEnvelope>,
{
    /// Open and dispatch a stock-in, stock-out or recycle operation.
    pub async fn open_operation(
        &self,
        request: StockRequest,
    ) -> Result<OpenedOperation, EngineError> {
        let StockRequest {
            account,
            material,
            kind,
            qty,
        } = request;
        if kind == OperationKind::Check {
            return Err(AllocationError::UnsupportedKind(kind).into());
        }
        if qty <= 0 {
            return Err(DomainError::validation("qty must be positive").into());
        }

        let bindings = self.parts.calibration.sensors_for_material(material);
        let [binding] = bindings.as_slice() else {
            return Err(EngineError::SensorBinding {
                material,
                found: bindings.len(),
            });
        };
        let sensor = binding.sensor;

        let mut candidates = self.parts.catalog.grids_for_material(material);
        if kind == OperationKind::Out {
            sort_outbound_candidates(&mut candidates, |grid| self.held(material, grid));
        }
        let (grid, channel) = self.place(material, sensor, kind, qty, candidates)?;
        let reserved = if kind.is_inbound() { qty } else { 0 };

        let now = Utc::now();
        let qty_before = self.held(material, grid.id);
        let op = self.parts.operations.create(
            OperationDraft {
                kind,
                material,
                sensor,
                grid: grid.id,
                box_id: grid.box_id,
                box_addr: grid.box_addr,
                channel,
                account,
                requested_qty: qty,
                qty_before,
            },
            now,
        );
        self.register(&op, reserved, now);
        info!(
            operation = %op.id,
            kind = %kind,
            material = %material,
            grid = %grid.id,
            channel,
            qty,
            "stock operation opened"
        );

        self.dispatch(&op, GatewayAction::Open).await?;

        Ok(OpenedOperation {
            operation_id: op.id,
            grid_id: grid.id,
            channel,
        })
    }

    /// Weigh every stocked grid of a cabinet to true up the books.
    ///
    /// One `check` operation is opened per stock row. The first dispatch
    /// failure aborts the run; operations dispatched before it stay pending.
    pub async fn run_inventory_check(
        &self,
        box_id: BoxId,
        account: Option<AccountId>,
    ) -> Result<Vec<Operation>, EngineError> {
        let grids = self.parts.catalog.grids_in_box(box_id);
        if grids.is_empty() {
            return Err(DomainError::not_found(format!("box {box_id}")).into());
        }

        let mut opened = Vec::new();
        for grid in grids {
            for row in self.parts.stock.list_for_grid(grid.id) {
                let channel = self.parts.catalog.channel(grid.id, row.sensor).ok_or(
                    EngineError::ChannelNotBound {
                        grid: grid.id,
                        sensor: row.sensor,
                    },
                )?;

                let now = Utc::now();
                let op = self.parts.operations.create(
                    OperationDraft {
                        kind: OperationKind::Check,
                        material: row.key.material,
                        sensor: row.sensor,
                        grid: grid.id,
                        box_id,
                        box_addr: grid.box_addr,
                        channel,
                        account,
                        requested_qty: 0,
                        qty_before: row.qty,
                    },
                    now,
                );
                self.register(&op, 0, now);
                self.dispatch(&op, GatewayAction::Check).await?;

                opened.push(self.parts.operations.get(op.id).unwrap_or(op));
            }
        }

        info!(box_id = %box_id, operations = opened.len(), "inventory check dispatched");
        Ok(opened)
    }

    /// Apply a weight webhook to the operation it correlates with.
    pub fn reconcile(&self, payload: &WebhookPayload) -> Result<ReconcileOutcome, EngineError> {
        if payload.operation == HW_OP_WEIGH {
            debug!(box_id = payload.box_id, grid_id = payload.grid_id, weight = payload.weight, "weigh-only reading");
            return Ok(ReconcileOutcome::WeighOnly);
        }

        let token = payload.uuid.trim();
        let Some(id) = parse_token(token) else {
            info!(token = %token, weight = payload.weight, "webhook without correlation token");
            return Err(EngineError::CorrelationNotFound(token.to_string()));
        };
        let Some(pending) = self.pending.take(id) else {
            warn!(operation = %id, "webhook for an operation that is not pending");
            return Err(EngineError::CorrelationNotFound(token.to_string()));
        };

        let now = Utc::now();
        if pending.is_expired(now) {
            self.expire(&pending, now);
            return Err(EngineError::CorrelationNotFound(token.to_string()));
        }

        let result = self.apply_reading(&pending, payload.weight, now);

        if pending.reserved > 0 {
            self.parts.catalog.release(pending.grid, pending.reserved);
        }

        if let Err(e) = &result {
            warn!(operation = %id, error = %e, "webhook could not be reconciled");
            self.fail(pending.operation, e.to_string(), now);
        }
        result
    }

    /// Close every correlation whose deadline passed. Returns the expired ids.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<OperationId> {
        let expired = self.pending.drain_expired(now);
        for pending in &expired {
            self.expire(pending, now);
        }
        expired.into_iter().map(|p| p.operation).collect()
    }

    /// Publish a notification; failures are logged, never propagated.
    pub fn notify(&self, notification: Notification) {
        let topic = notification.topic();
        if let Err(e) = self.bus.publish(NotificationEnvelope::new(notification)) {
            error!(topic, error = %e, "failed to publish notification");
        }
    }

    /// Stock of `material` in `grid`, zero without a row.
    fn held(&self, material: MaterialId, grid: GridId) -> i64 {
        self.parts
            .stock
            .get(&StockKey::new(material, grid))
            .map_or(0, |s| s.qty)
    }

    /// Allocate a grid and resolve its channel. Inbound kinds also reserve
    /// `qty` on the grid; a grid that refuses drops out and allocation moves
    /// on to the next candidate.
    fn place(
        &self,
        material: MaterialId,
        sensor: SensorId,
        kind: OperationKind,
        qty: i64,
        mut candidates: Vec<Grid>,
    ) -> Result<(Grid, i64), EngineError> {
        let mut raced = None;
        loop {
            let grid = match SlotAllocator::allocate(material, kind, &candidates) {
                Ok(grid) => grid.clone(),
                Err(e) => {
                    return Err(match (e, raced) {
                        (AllocationError::NoSlotAvailable(_), Some(grid)) => {
                            EngineError::AllocationRace(grid)
                        }
                        (e, _) => e.into(),
                    });
                }
            };

            let channel = self
                .parts
                .catalog
                .channel(grid.id, sensor)
                .ok_or(EngineError::ChannelNotBound {
                    grid: grid.id,
                    sensor,
                })?;
            if !kind.is_inbound() {
                return Ok((grid, channel));
            }

            match self.parts.catalog.reserve(grid.id, qty) {
                Ok(()) => return Ok((grid, channel)),
                Err(CatalogError::Full(id)) => {
                    debug!(grid = %id, "grid filled up since it was listed");
                    raced = Some(id);
                }
                Err(CatalogError::NoRoom { grid: id, free, .. }) => {
                    debug!(grid = %id, free, qty, "grid too small for the request");
                }
                Err(other) => {
                    return Err(EngineError::Domain(DomainError::not_found(other.to_string())));
                }
            }
            candidates.retain(|g| g.id != grid.id);
        }
    }

    fn register(&self, op: &Operation, reserved: i64, now: DateTime<Utc>) {
        let ttl = TimeDelta::from_std(self.config.pending_ttl).unwrap_or(TimeDelta::days(365));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let inserted = self.pending.insert(PendingCorrelation {
            operation: op.id,
            kind: op.kind,
            material: op.material,
            sensor: op.sensor,
            grid: op.grid,
            reserved,
            issued_at: now,
            expires_at,
        });
        if !inserted {
            error!(operation = %op.id, "operation id registered twice");
        }
    }

    async fn dispatch(&self, op: &Operation, action: GatewayAction) -> Result<(), EngineError> {
        let command = HardwareCommand::new(op.box_addr, op.channel)
            .with_uuid(op.token())
            .with_operation(op.kind.hardware_code());

        match self.parts.gateway.send(action, &command).await {
            Ok(_) => {
                let marked = self
                    .parts
                    .operations
                    .update(op.id, &mut |o: &mut Operation| o.mark_dispatched(Utc::now()));
                if let Err(e) = marked {
                    // The webhook can beat the gateway's HTTP answer.
                    debug!(operation = %op.id, error = %e, "operation settled before dispatch returned");
                }
                Ok(())
            }
            Err(e) => {
                warn!(operation = %op.id, error = %e, "hardware dispatch failed");
                if let Some(pending) = self.pending.take(op.id) {
                    if pending.reserved > 0 {
                        self.parts.catalog.release(pending.grid, pending.reserved);
                    }
                }
                self.fail(op.id, e.to_string(), Utc::now());
                Err(EngineError::Dispatch(e))
            }
        }
    }

    fn apply_reading(
        &self,
        pending: &PendingCorrelation,
        weight: i64,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let params = self
            .parts
            .calibration
            .calibration(pending.material, pending.sensor)
            .ok_or(EngineError::Calibration {
                material: pending.material,
                sensor: pending.sensor,
            })?;
        let measured = params.infer(weight);
        let key = StockKey::new(pending.material, pending.grid);

        debug!(operation = %pending.operation, weight, measured, "reading inferred");

        self.stock_locks.with(key, || match pending.kind {
            OperationKind::Check => self.apply_check(pending, key, measured, now),
            _ => self.apply_movement(pending, key, measured, now),
        })
    }

    fn apply_movement(
        &self,
        pending: &PendingCorrelation,
        key: StockKey,
        measured: i64,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let current = self.parts.stock.get(&key);
        let transition = StockTransition::compute(
            pending.kind,
            current.as_ref().map(|s| s.qty),
            measured,
            self.config.missing_stock,
        )
        .map_err(|_| EngineError::StockNotFound {
            material: pending.material,
            grid: pending.grid,
        })?;

        let previous = current.as_ref().map_or(0, |s| s.qty);
        let written = match transition.write {
            StockWrite::Upsert(qty) => {
                self.parts.stock.upsert(Stock {
                    key,
                    sensor: current.map(|s| s.sensor).unwrap_or(pending.sensor),
                    qty,
                });
                qty
            }
            StockWrite::Delete => {
                self.parts.stock.remove(&key);
                0
            }
        };
        self.parts.catalog.adjust_stocked(pending.grid, written - previous);

        let op = self
            .parts
            .operations
            .update(pending.operation, &mut |o: &mut Operation| {
                o.mark_reconciled(&transition, now)
            })?;

        info!(
            operation = %op.id,
            kind = %op.kind,
            before = transition.before,
            delta = transition.delta,
            after = transition.after,
            "stock reconciled"
        );
        self.notify(Notification::InventoryChanged {
            operation_id: op.id,
            material_id: op.material,
            kind: op.kind,
            qty: transition.delta,
        });
        Ok(ReconcileOutcome::Reconciled(op))
    }

    fn apply_check(
        &self,
        pending: &PendingCorrelation,
        key: StockKey,
        measured: i64,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let Some(current) = self.parts.stock.get(&key) else {
            return Err(EngineError::StockNotFound {
                material: pending.material,
                grid: pending.grid,
            });
        };
        let previous = current.qty;
        self.parts.stock.upsert(Stock {
            qty: measured,
            ..current
        });
        self.parts.catalog.adjust_stocked(pending.grid, measured - previous);

        let op = self
            .parts
            .operations
            .update(pending.operation, &mut |o: &mut Operation| {
                o.record_check(measured, now)
            })?;

        info!(operation = %op.id, before = op.qty_before, measured, "inventory check applied");
        self.notify(Notification::InventoryChecked {
            operation_id: op.id,
            material_id: op.material,
            grid_id: op.grid,
            qty_before: op.qty_before,
            qty: measured,
        });
        Ok(ReconcileOutcome::Checked(op))
    }

    fn expire(&self, pending: &PendingCorrelation, now: DateTime<Utc>) {
        if pending.reserved > 0 {
            self.parts.catalog.release(pending.grid, pending.reserved);
        }
        match self
            .parts
            .operations
            .update(pending.operation, &mut |o: &mut Operation| o.mark_expired(now))
        {
            Ok(_) => {
                warn!(operation = %pending.operation, issued_at = %pending.issued_at, "operation expired without webhook");
                self.notify(Notification::OperationClosed {
                    operation_id: pending.operation,
                    status: OperationStatus::Expired,
                });
            }
            Err(e) => error!(operation = %pending.operation, error = %e, "failed to expire operation"),
        }
    }

    fn fail(&self, id: OperationId, reason: String, now: DateTime<Utc>) {
        match self
            .parts
            .operations
            .update(id, &mut |o: &mut Operation| o.mark_failed(reason.clone(), now))
        {
            Ok(_) => self.notify(Notification::OperationClosed {
                operation_id: id,
                status: OperationStatus::Failed,
            }),
            Err(e) => error!(operation = %id, error = %e, "failed to mark operation failed"),
        }
    }
}
