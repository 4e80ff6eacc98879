use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use cabinet_core::{AccountId, BoxId, MaterialId};
use cabinet_infra::{HardwareCommand, StockRequest, WebhookPayload};
use cabinet_inventory::{HW_OP_UNWEIGHED, OperationKind};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRequestBody {
    #[serde(default)]
    pub account_id: Option<i64>,
    pub material_id: i64,
    pub qty: i64,
}

impl StockRequestBody {
    pub fn into_request(self, kind: OperationKind) -> Result<StockRequest, axum::response::Response> {
        let account = parse_account(self.account_id)?;
        let material = MaterialId::parse_positive(self.material_id).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
        })?;
        if self.qty <= 0 {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "qty must be positive",
            ));
        }
        Ok(StockRequest {
            account,
            material,
            kind,
            qty: self.qty,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoInventoryRequest {
    #[serde(default)]
    pub account_id: Option<i64>,
    pub box_id: i64,
}

impl AutoInventoryRequest {
    pub fn ids(&self) -> Result<(BoxId, Option<AccountId>), axum::response::Response> {
        let box_id = BoxId::parse_positive(self.box_id).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
        })?;
        Ok((box_id, parse_account(self.account_id)?))
    }
}

fn parse_account(raw: Option<i64>) -> Result<Option<AccountId>, axum::response::Response> {
    raw.map(AccountId::parse_positive)
        .transpose()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

/// Envelope the hardware gateway wraps most callbacks in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallbackEnvelope {
    pub api: String,
    pub code: i64,
    pub err: String,
    pub data: Option<WebhookPayload>,
}

/// Body of the serial pass-through routes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialRequest {
    pub uuid: Option<String>,
    pub box_id: i64,
    pub grid_id: i64,
    pub operation: Option<i64>,
    pub weight: Option<i64>,
}

impl SerialRequest {
    /// Validate the addressing and build the command.
    ///
    /// `allowed_ops` lists the operation codes the target endpoint accepts
    /// (a missing code counts as `0`); empty means the operation is not
    /// checked.
    pub fn into_command(self, allowed_ops: &[i64]) -> Result<HardwareCommand, axum::response::Response> {
        if self.box_id <= 0 {
            return Err(errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "boxId must be positive"));
        }
        if self.grid_id < 0 {
            return Err(errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "gridId must not be negative"));
        }

        let mut cmd = HardwareCommand::new(self.box_id, self.grid_id);
        if let Some(uuid) = self.uuid {
            cmd = cmd.with_uuid(uuid);
        }
        if !allowed_ops.is_empty() {
            let op = self.operation.unwrap_or(HW_OP_UNWEIGHED);
            if !allowed_ops.contains(&op) {
                return Err(errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("operation must be one of {allowed_ops:?}"),
                ));
            }
            cmd = cmd.with_operation(op);
        } else if let Some(op) = self.operation {
            cmd = cmd.with_operation(op);
        }
        if let Some(weight) = self.weight {
            cmd = cmd.with_weight(weight);
        }
        Ok(cmd)
    }
}

/// Raw callback body: JSON when it parses, the plain text otherwise.
pub fn raw_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_request_requires_positive_ids_and_qty() {
        let ok = StockRequestBody { account_id: Some(1), material_id: 10, qty: 2 }
            .into_request(OperationKind::In)
            .unwrap();
        assert_eq!(ok.material, MaterialId::new(10));

        let zero_qty = StockRequestBody { account_id: None, material_id: 10, qty: 0 };
        assert_eq!(zero_qty.into_request(OperationKind::Out).unwrap_err().status(), StatusCode::BAD_REQUEST);

        let bad_account = StockRequestBody { account_id: Some(-1), material_id: 10, qty: 1 };
        assert_eq!(bad_account.into_request(OperationKind::In).unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn serial_request_validates_addressing_and_operation() {
        let open = SerialRequest { box_id: 7, grid_id: 0, operation: Some(1), ..Default::default() };
        assert_eq!(open.into_command(&[0, 1, 2]).unwrap().operation, 1);

        let bad_op = SerialRequest { box_id: 7, grid_id: 0, operation: Some(5), ..Default::default() };
        assert!(bad_op.into_command(&[0, 1, 2]).is_err());

        let bad_box = SerialRequest { box_id: 0, grid_id: 0, ..Default::default() };
        assert!(bad_box.into_command(&[]).is_err());
    }

    #[test]
    fn raw_body_keeps_non_json_text() {
        assert_eq!(raw_body("{\"a\":1}".into())["a"], 1);
        assert_eq!(raw_body("door open".into()), Value::String("door open".into()));
    }
}
