//! Infrastructure layer: collaborator boundaries, the hardware gateway client,
//! the reconciliation engine and the background threads around it.

pub mod card_reader;
pub mod catalog;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod gateway;
pub mod locks;
pub mod store;
pub mod sweeper;

pub use card_reader::{CardReaderHandle, CardReaderLine, CardReaderWorker, ReaderPoller, ReaderPollerHandle};
pub use catalog::{
    CalibrationSource, CatalogError, CatalogSeed, ChannelBinding, GridCatalog, InMemoryCatalog,
    MaterialSensor,
};
pub use config::ServiceConfig;
pub use correlation::{PendingCorrelation, PendingCorrelations};
pub use engine::{
    EngineConfig, EngineError, EngineParts, OpenedOperation, ReconcileOutcome, ReconciliationEngine,
    StockRequest, WebhookPayload,
};
pub use gateway::{
    GatewayAction, GatewayError, HardwareCommand, HardwareGateway, HttpGateway, RecordingGateway,
};
pub use locks::KeyedLocks;
pub use store::{InMemoryOperationStore, InMemoryStockLedger, OperationStore, StockLedger};
pub use sweeper::{CorrelationSweeper, CorrelationSweeperHandle};
