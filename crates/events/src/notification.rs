//! Notification topics.
//!
//! Each variant maps to one topic name on the push channel. Hardware
//! callbacks the core does not interpret are forwarded as raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cabinet_core::{GridId, MaterialId, OperationId};
use cabinet_inventory::{OperationKind, OperationStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data")]
pub enum Notification {
    /// A card was presented to the reader (serial line or gateway callback).
    #[serde(rename = "loginByCard")]
    CardScanned { card: String },

    /// Raw weight callback, published before any reconciliation.
    #[serde(rename = "weight")]
    Weight(Value),

    /// Stock moved by a reconciled in/out/recycle operation.
    #[serde(rename = "inventory", rename_all = "camelCase")]
    InventoryChanged {
        operation_id: OperationId,
        material_id: MaterialId,
        kind: OperationKind,
        qty: i64,
    },

    /// An inventory check overwrote the books with a measured count.
    #[serde(rename = "inventoryChecked", rename_all = "camelCase")]
    InventoryChecked {
        operation_id: OperationId,
        material_id: MaterialId,
        grid_id: GridId,
        qty_before: i64,
        qty: i64,
    },

    /// An operation ended without reconciling (failed or expired).
    #[serde(rename = "operation", rename_all = "camelCase")]
    OperationClosed {
        operation_id: OperationId,
        status: OperationStatus,
    },

    /// Barcode or QR code scan.
    #[serde(rename = "scanner")]
    Scanner(Value),

    #[serde(rename = "finger")]
    Finger(Value),

    #[serde(rename = "zero")]
    Zero(Value),

    #[serde(rename = "measure")]
    Measure(Value),

    #[serde(rename = "boxStatus")]
    BoxStatus(Value),

    #[serde(rename = "doorStatus")]
    DoorStatus(Value),

    #[serde(rename = "light")]
    Light(Value),
}

impl Notification {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::CardScanned { .. } => "loginByCard",
            Self::Weight(_) => "weight",
            Self::InventoryChanged { .. } => "inventory",
            Self::InventoryChecked { .. } => "inventoryChecked",
            Self::OperationClosed { .. } => "operation",
            Self::Scanner(_) => "scanner",
            Self::Finger(_) => "finger",
            Self::Zero(_) => "zero",
            Self::Measure(_) => "measure",
            Self::BoxStatus(_) => "boxStatus",
            Self::DoorStatus(_) => "doorStatus",
            Self::Light(_) => "light",
        }
    }
}

/// A notification stamped with an id and the time it was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    notification: Notification,
}

impl NotificationEnvelope {
    pub fn new(notification: Notification) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            notification,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn topic(&self) -> &'static str {
        self.notification.topic()
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    pub fn into_notification(self) -> Notification {
        self.notification
    }
}

impl From<Notification> for NotificationEnvelope {
    fn from(notification: Notification) -> Self {
        Self::new(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inventory_change_serializes_under_its_topic() {
        let envelope = NotificationEnvelope::new(Notification::InventoryChanged {
            operation_id: OperationId::new(11),
            material_id: MaterialId::new(3),
            kind: OperationKind::Out,
            qty: 2,
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["topic"], "inventory");
        assert_eq!(value["data"], json!({"operationId": 11, "materialId": 3, "kind": "out", "qty": 2}));
        assert_eq!(envelope.topic(), "inventory");
    }

    #[test]
    fn card_scan_uses_login_topic() {
        let n = Notification::CardScanned { card: "0A1B".into() };
        assert_eq!(n.topic(), "loginByCard");
        assert_eq!(serde_json::to_value(&n).unwrap(), json!({"topic": "loginByCard", "data": {"card": "0A1B"}}));
    }

    #[test]
    fn every_envelope_gets_its_own_id() {
        let a = NotificationEnvelope::new(Notification::Zero(json!({})));
        let b = NotificationEnvelope::new(Notification::Zero(json!({})));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().get_version_num(), 7);
    }
}
