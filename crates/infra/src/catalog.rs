//! Catalog collaborators: grids, sensor bindings, channels and capacity.
//!
//! Grid capacity is owned here. The engine only reports stock levels back
//! after a write and places or releases reservations for in-flight inbound
//! operations; `reserve` is the single point where "room left" is decided.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use cabinet_core::{BoxId, GridId, MaterialId, SensorId};
use cabinet_inventory::{CalibrationParams, Grid, Stock};

/// A material wired to a weight sensor, with its calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSensor {
    pub material: MaterialId,
    pub sensor: SensorId,
    pub params: CalibrationParams,
}

/// Hardware channel of a sensor within a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBinding {
    pub grid: GridId,
    pub sensor: SensorId,
    pub channel: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown grid {0}")]
    UnknownGrid(GridId),

    #[error("grid {0} is full")]
    Full(GridId),

    #[error("grid {grid} has room for {free}, asked for {requested}")]
    NoRoom { grid: GridId, free: i64, requested: i64 },

    #[error("failed to load catalog seed: {0}")]
    Seed(String),
}

pub trait GridCatalog: Send + Sync {
    /// Grids bound to `material`, in catalog order.
    fn grids_for_material(&self, material: MaterialId) -> Vec<Grid>;

    /// Every grid of a cabinet, in catalog order.
    fn grids_in_box(&self, box_id: BoxId) -> Vec<Grid>;

    fn grid(&self, id: GridId) -> Option<Grid>;

    fn channel(&self, grid: GridId, sensor: SensorId) -> Option<i64>;

    /// Add `qty` to the grid's in-flight total. Never takes a bounded grid
    /// past its `max_qty`.
    fn reserve(&self, grid: GridId, qty: i64) -> Result<(), CatalogError>;

    fn release(&self, grid: GridId, qty: i64);

    /// Move the grid's stock level by `delta` after a ledger write.
    fn adjust_stocked(&self, grid: GridId, delta: i64);
}

pub trait CalibrationSource: Send + Sync {
    fn sensors_for_material(&self, material: MaterialId) -> Vec<MaterialSensor>;

    fn calibration(&self, material: MaterialId, sensor: SensorId) -> Option<CalibrationParams>;
}

impl<S> GridCatalog for Arc<S>
where
    S: GridCatalog + ?Sized,
{
    fn grids_for_material(&self, material: MaterialId) -> Vec<Grid> {
        (**self).grids_for_material(material)
    }

    fn grids_in_box(&self, box_id: BoxId) -> Vec<Grid> {
        (**self).grids_in_box(box_id)
    }

    fn grid(&self, id: GridId) -> Option<Grid> {
        (**self).grid(id)
    }

    fn channel(&self, grid: GridId, sensor: SensorId) -> Option<i64> {
        (**self).channel(grid, sensor)
    }

    fn reserve(&self, grid: GridId, qty: i64) -> Result<(), CatalogError> {
        (**self).reserve(grid, qty)
    }

    fn release(&self, grid: GridId, qty: i64) {
        (**self).release(grid, qty)
    }

    fn adjust_stocked(&self, grid: GridId, delta: i64) {
        (**self).adjust_stocked(grid, delta)
    }
}

impl<S> CalibrationSource for Arc<S>
where
    S: CalibrationSource + ?Sized,
{
    fn sensors_for_material(&self, material: MaterialId) -> Vec<MaterialSensor> {
        (**self).sensors_for_material(material)
    }

    fn calibration(&self, material: MaterialId, sensor: SensorId) -> Option<CalibrationParams> {
        (**self).calibration(material, sensor)
    }
}

/// JSON seed for the in-memory catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSeed {
    pub grids: Vec<Grid>,
    pub sensors: Vec<MaterialSensor>,
    pub channels: Vec<ChannelBinding>,
    /// Opening stock; also primes grid levels.
    pub stock: Vec<Stock>,
}

impl CatalogSeed {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Seed(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(raw).map_err(|e| CatalogError::Seed(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Level {
    stocked: i64,
    reserved: i64,
}

impl Level {
    fn total(self) -> i64 {
        self.stocked + self.reserved
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    grids: Vec<Grid>,
    sensors: Vec<MaterialSensor>,
    channels: HashMap<(GridId, SensorId), i64>,
    levels: HashMap<GridId, Level>,
}

impl CatalogState {
    fn snapshot(&self, grid: &Grid) -> Grid {
        let level = self.levels.get(&grid.id).copied().unwrap_or_default();
        Grid {
            current_qty: level.total().max(0),
            ..grid.clone()
        }
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    inner: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let mut state = CatalogState {
            grids: seed.grids.clone(),
            sensors: seed.sensors.clone(),
            ..CatalogState::default()
        };
        for binding in &seed.channels {
            state.channels.insert((binding.grid, binding.sensor), binding.channel);
        }
        for row in &seed.stock {
            state.levels.entry(row.key.grid).or_default().stocked += row.qty;
        }
        Self {
            inner: RwLock::new(state),
        }
    }

    pub fn add_grid(&self, grid: Grid) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.grids.push(grid);
    }

    pub fn bind_sensor(&self, binding: MaterialSensor) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.sensors.push(binding);
    }

    pub fn bind_channel(&self, grid: GridId, sensor: SensorId, channel: i64) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.channels.insert((grid, sensor), channel);
    }

    /// Overwrite the stock level of a grid, e.g. when priming from a ledger.
    pub fn set_stocked(&self, grid: GridId, qty: i64) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.levels.entry(grid).or_default().stocked = qty;
    }

    /// Quantity currently reserved by in-flight inbound operations.
    pub fn reserved(&self, grid: GridId) -> i64 {
        self.inner
            .read()
            .map(|s| s.levels.get(&grid).map(|l| l.reserved).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl GridCatalog for InMemoryCatalog {
    fn grids_for_material(&self, material: MaterialId) -> Vec<Grid> {
        let state = match self.inner.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        state
            .grids
            .iter()
            .filter(|g| g.material == Some(material))
            .map(|g| state.snapshot(g))
            .collect()
    }

    fn grids_in_box(&self, box_id: BoxId) -> Vec<Grid> {
        let state = match self.inner.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        state
            .grids
            .iter()
            .filter(|g| g.box_id == box_id)
            .map(|g| state.snapshot(g))
            .collect()
    }

    fn grid(&self, id: GridId) -> Option<Grid> {
        let state = self.inner.read().ok()?;
        state.grids.iter().find(|g| g.id == id).map(|g| state.snapshot(g))
    }

    fn channel(&self, grid: GridId, sensor: SensorId) -> Option<i64> {
        let state = self.inner.read().ok()?;
        state.channels.get(&(grid, sensor)).copied()
    }

    fn reserve(&self, grid: GridId, qty: i64) -> Result<(), CatalogError> {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let max_qty = state
            .grids
            .iter()
            .find(|g| g.id == grid)
            .map(|g| g.max_qty)
            .ok_or(CatalogError::UnknownGrid(grid))?;

        let level = state.levels.entry(grid).or_default();
        if max_qty > 0 {
            let free = max_qty - level.total();
            if free <= 0 {
                return Err(CatalogError::Full(grid));
            }
            if qty > free {
                return Err(CatalogError::NoRoom {
                    grid,
                    free,
                    requested: qty,
                });
            }
        }
        level.reserved += qty;
        Ok(())
    }

    fn release(&self, grid: GridId, qty: i64) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let level = state.levels.entry(grid).or_default();
        level.reserved -= qty;
        if level.reserved < 0 {
            warn!(grid = %grid, reserved = level.reserved, "reservation released twice");
            level.reserved = 0;
        }
    }

    fn adjust_stocked(&self, grid: GridId, delta: i64) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.levels.entry(grid).or_default().stocked += delta;
    }
}

impl CalibrationSource for InMemoryCatalog {
    fn sensors_for_material(&self, material: MaterialId) -> Vec<MaterialSensor> {
        let state = match self.inner.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        state
            .sensors
            .iter()
            .filter(|b| b.material == material)
            .cloned()
            .collect()
    }

    fn calibration(&self, material: MaterialId, sensor: SensorId) -> Option<CalibrationParams> {
        let state = self.inner.read().ok()?;
        state
            .sensors
            .iter()
            .find(|b| b.material == material && b.sensor == sensor)
            .map(|b| b.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"{
        "grids": [
            {"id": 1, "boxId": 1, "boxAddr": 7, "channel": 0, "maxQty": 5, "material": 10},
            {"id": 2, "boxId": 1, "boxAddr": 7, "channel": 1, "maxQty": 0, "material": 10},
            {"id": 3, "boxId": 2, "boxAddr": 8, "channel": 0, "maxQty": 2, "material": 11}
        ],
        "sensors": [
            {"material": 10, "sensor": 100, "params": {"weight": 50, "lower": 5, "comeUp": 10}}
        ],
        "channels": [
            {"grid": 1, "sensor": 100, "channel": 4}
        ],
        "stock": [
            {"key": {"material": 10, "grid": 1}, "sensor": 100, "qty": 4}
        ]
    }"#;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::from_seed(&CatalogSeed::from_json(SEED).unwrap())
    }

    #[test]
    fn seed_loads_grids_in_catalog_order_with_levels() {
        let catalog = catalog();
        let grids = catalog.grids_for_material(MaterialId::new(10));
        let ids: Vec<_> = grids.iter().map(|g| g.id.get()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(grids[0].current_qty, 4);
        assert_eq!(catalog.grids_in_box(BoxId::new(2)).len(), 1);
        assert_eq!(catalog.channel(GridId::new(1), SensorId::new(100)), Some(4));
        assert_eq!(catalog.channel(GridId::new(2), SensorId::new(100)), None);
    }

    #[test]
    fn last_free_slot_can_only_be_reserved_once() {
        let catalog = catalog();
        catalog.reserve(GridId::new(1), 1).unwrap();
        assert_eq!(catalog.reserve(GridId::new(1), 1), Err(CatalogError::Full(GridId::new(1))));

        catalog.release(GridId::new(1), 1);
        assert!(catalog.reserve(GridId::new(1), 1).is_ok());
    }

    #[test]
    fn reservation_never_overshoots_capacity() {
        let catalog = catalog();
        assert_eq!(
            catalog.reserve(GridId::new(1), 3),
            Err(CatalogError::NoRoom {
                grid: GridId::new(1),
                free: 1,
                requested: 3,
            })
        );
        assert_eq!(catalog.reserved(GridId::new(1)), 0);

        catalog.reserve(GridId::new(1), 1).unwrap();
        assert_eq!(catalog.grid(GridId::new(1)).unwrap().current_qty, 5);
    }

    #[test]
    fn stock_adjustments_from_different_threads_all_land() {
        let catalog = Arc::new(catalog());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        catalog.adjust_stocked(GridId::new(2), if i % 2 == 0 { 2 } else { 1 });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(catalog.grid(GridId::new(2)).unwrap().current_qty, 300);
    }

    #[test]
    fn unlimited_grids_always_accept_reservations() {
        let catalog = catalog();
        for _ in 0..10 {
            catalog.reserve(GridId::new(2), 3).unwrap();
        }
        assert_eq!(catalog.reserved(GridId::new(2)), 30);
        assert_eq!(catalog.grid(GridId::new(2)).unwrap().current_qty, 30);
    }

    #[test]
    fn unknown_grid_cannot_be_reserved() {
        assert_eq!(
            catalog().reserve(GridId::new(42), 1),
            Err(CatalogError::UnknownGrid(GridId::new(42)))
        );
    }

    #[test]
    fn calibration_comes_from_sensor_binding() {
        let catalog = catalog();
        let params = catalog.calibration(MaterialId::new(10), SensorId::new(100)).unwrap();
        assert_eq!(params.infer(105), 3);
        assert!(catalog.calibration(MaterialId::new(10), SensorId::new(101)).is_none());
        assert_eq!(catalog.sensors_for_material(MaterialId::new(11)).len(), 0);
    }
}
