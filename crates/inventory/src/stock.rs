//! Stock rows and the transition applied when a reading is reconciled.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use cabinet_core::{DomainError, DomainResult, Entity, GridId, MaterialId, SensorId};

use crate::operation::OperationKind;

/// Stock is keyed by (material, grid); there is never more than one row per key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub material: MaterialId,
    pub grid: GridId,
}

impl StockKey {
    pub fn new(material: MaterialId, grid: GridId) -> Self {
        Self { material, grid }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub key: StockKey,
    pub sensor: SensorId,
    pub qty: i64,
}

impl Entity for Stock {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

/// What to do when a reading arrives for a (material, grid) with no stock row.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStockPolicy {
    /// Stock-in and recycle create the row; stock-out is rejected.
    #[default]
    InboundOnly,
    /// Any kind creates the row from the reading.
    AdoptReading,
}

impl FromStr for MissingStockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound_only" => Ok(Self::InboundOnly),
            "adopt_reading" => Ok(Self::AdoptReading),
            other => Err(DomainError::validation(format!(
                "unknown missing stock policy: {other}"
            ))),
        }
    }
}

/// How the stock row changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockWrite {
    Upsert(i64),
    Delete,
}

/// Stock change computed from one reconciled reading.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockTransition {
    pub before: i64,
    /// Items moved by the operation, positive in the operation's direction.
    pub delta: i64,
    pub after: i64,
    pub write: StockWrite,
}

impl StockTransition {
    /// Apply a measured count to the current stock (if any).
    ///
    /// Stock-in and recycle report `measured - stock`, stock-out reports
    /// `stock - measured` and removes the row once the grid reads empty.
    /// Returns `NotFound` when the row is missing and the policy refuses to
    /// create it.
    pub fn compute(
        kind: OperationKind,
        current: Option<i64>,
        measured: i64,
        policy: MissingStockPolicy,
    ) -> DomainResult<Self> {
        let Some(stock) = current else {
            let creates = kind.is_inbound() || policy == MissingStockPolicy::AdoptReading;
            if kind == OperationKind::Check || !creates {
                return Err(DomainError::not_found(format!("stock for {kind} operation")));
            }
            return Ok(Self {
                before: 0,
                delta: measured,
                after: measured,
                write: StockWrite::Upsert(measured),
            });
        };

        let (delta, write) = match kind {
            OperationKind::In | OperationKind::Recycle | OperationKind::Check => {
                (measured - stock, StockWrite::Upsert(measured))
            }
            OperationKind::Out if measured == 0 => (stock, StockWrite::Delete),
            OperationKind::Out => (stock - measured, StockWrite::Upsert(measured)),
        };
        Ok(Self {
            before: stock,
            delta,
            after: measured,
            write,
        })
    }
}
