//! Inventory domain rules for the storage cabinet.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage): weight to
//! count inference, slot allocation, the operation lifecycle and the stock
//! transition applied when a weight reading is reconciled.

pub mod allocation;
pub mod grid;
pub mod operation;
pub mod quantity;
pub mod stock;

pub use allocation::{AllocationError, SlotAllocator, sort_outbound_candidates};
pub use grid::Grid;
pub use operation::{
    HW_OP_CHECK, HW_OP_COUNT, HW_OP_UNWEIGHED, HW_OP_WEIGH, Operation, OperationDraft, OperationKind,
    OperationStatus,
};
pub use quantity::{CalibrationParams, infer};
pub use stock::{MissingStockPolicy, Stock, StockKey, StockTransition, StockWrite};
