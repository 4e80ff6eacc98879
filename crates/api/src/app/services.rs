use std::sync::Arc;

use cabinet_events::{InMemoryEventBus, Notification, NotificationEnvelope};
use cabinet_infra::{
    CatalogSeed, EngineConfig, EngineParts, HardwareGateway, InMemoryCatalog,
    InMemoryOperationStore, InMemoryStockLedger, ReconciliationEngine,
};

pub type NotificationBus = Arc<InMemoryEventBus<NotificationEnvelope>>;
pub type Engine = ReconciliationEngine<NotificationBus>;

/// Everything the handlers share.
pub struct AppServices {
    engine: Arc<Engine>,
    gateway: Arc<dyn HardwareGateway>,
    bus: NotificationBus,
}

impl AppServices {
    /// Single-process wiring: in-memory catalog, ledger and operation store.
    pub fn in_memory(
        seed: &CatalogSeed,
        gateway: Arc<dyn HardwareGateway>,
        config: EngineConfig,
    ) -> Self {
        let catalog = Arc::new(InMemoryCatalog::from_seed(seed));
        let bus: NotificationBus = Arc::new(InMemoryEventBus::new());

        let parts = EngineParts {
            operations: Arc::new(InMemoryOperationStore::new()),
            stock: Arc::new(InMemoryStockLedger::with_rows(seed.stock.iter().cloned())),
            catalog: catalog.clone(),
            calibration: catalog,
            gateway: gateway.clone(),
        };
        tracing::info!(
            grids = seed.grids.len(),
            sensors = seed.sensors.len(),
            stock_rows = seed.stock.len(),
            "in-memory catalog loaded"
        );

        Self {
            engine: Arc::new(ReconciliationEngine::new(parts, bus.clone(), config)),
            gateway,
            bus,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn gateway(&self) -> &Arc<dyn HardwareGateway> {
        &self.gateway
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn publish(&self, notification: Notification) {
        self.engine.notify(notification);
    }
}
