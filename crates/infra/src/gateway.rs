//! Hardware gateway client.
//!
//! The gateway drives the cabinet boards (locks, scales, lights) and later
//! reports results by webhook. Commands carry the operation id as `uuid`;
//! the gateway echoes it back so the webhook can be correlated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Command body posted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareCommand {
    /// Correlation token; empty for commands nobody waits on.
    #[serde(default)]
    pub uuid: String,
    /// Cabinet board address.
    pub box_id: i64,
    /// Grid channel on the board.
    pub grid_id: i64,
    #[serde(default)]
    pub operation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
}

impl HardwareCommand {
    pub fn new(box_id: i64, grid_id: i64) -> Self {
        Self {
            uuid: String::new(),
            box_id,
            grid_id,
            operation: 0,
            weight: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_operation(mut self, operation: i64) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Gateway endpoints taking a [`HardwareCommand`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GatewayAction {
    /// Unlock a grid; with a count/check operation the gateway weighs on close.
    Open,
    Weigh,
    Zero,
    Measure,
    Check,
    Light,
}

impl GatewayAction {
    pub fn path(self) -> &'static str {
        match self {
            Self::Open => "/v1/serial/open",
            Self::Weigh => "/v1/serial/weight",
            Self::Zero => "/v1/serial/weight/zero",
            Self::Measure => "/v1/serial/weight/measure",
            Self::Check => "/v1/serial/weight/check",
            Self::Light => "/v1/serial/light",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("gateway answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait HardwareGateway: Send + Sync {
    /// Post a command; returns whatever JSON the gateway answered with.
    async fn send(&self, action: GatewayAction, command: &HardwareCommand)
    -> Result<Value, GatewayError>;

    /// Door/light status of every grid on a board.
    async fn box_status(&self, box_addr: i64) -> Result<Value, GatewayError>;

    async fn open(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Open, command).await
    }

    async fn weigh(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Weigh, command).await
    }

    async fn zero(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Zero, command).await
    }

    async fn measure(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Measure, command).await
    }

    async fn check(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Check, command).await
    }

    async fn light(&self, command: &HardwareCommand) -> Result<Value, GatewayError> {
        self.send(GatewayAction::Light, command).await
    }
}

/// JSON-over-HTTP gateway client.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_body(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl HardwareGateway for HttpGateway {
    async fn send(
        &self,
        action: GatewayAction,
        command: &HardwareCommand,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, action.path());
        info!(url = %url, uuid = %command.uuid, box_id = command.box_id, grid_id = command.grid_id, operation = command.operation, "posting hardware command");

        let response = self.client.post(&url).json(command).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "hardware gateway unreachable");
            GatewayError::from(e)
        })?;
        let body = Self::read_body(response).await?;
        debug!(url = %url, response = %body, "hardware gateway answered");
        Ok(body)
    }

    async fn box_status(&self, box_addr: i64) -> Result<Value, GatewayError> {
        let url = format!("{}/v1/serial/box/{}/status", self.base_url, box_addr);
        let response = self.client.get(&url).send().await?;
        Self::read_body(response).await
    }
}

/// Gateway that records commands instead of sending them.
///
/// Used by tests and by local runs without cabinet hardware. Can be told to
/// fail, which exercises the dispatch failure path.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(GatewayAction, HardwareCommand)>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(GatewayAction, HardwareCommand)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last(&self) -> Option<(GatewayAction, HardwareCommand)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    fn fail_if_asked(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("recording gateway set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl HardwareGateway for RecordingGateway {
    async fn send(
        &self,
        action: GatewayAction,
        command: &HardwareCommand,
    ) -> Result<Value, GatewayError> {
        self.fail_if_asked()?;
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((action, command.clone()));
        Ok(Value::Null)
    }

    async fn box_status(&self, box_addr: i64) -> Result<Value, GatewayError> {
        self.fail_if_asked()?;
        Ok(serde_json::json!({ "boxId": box_addr, "doorStatusList": [] }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_camel_case_without_unset_weight() {
        let cmd = HardwareCommand::new(3, 7).with_uuid("42").with_operation(2);
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            serde_json::json!({"uuid": "42", "boxId": 3, "gridId": 7, "operation": 2})
        );
        let measure = HardwareCommand::new(3, 7).with_weight(500);
        assert_eq!(serde_json::to_value(&measure).unwrap()["weight"], 500);
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let gw = HttpGateway::new("http://127.0.0.1:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(gw.base_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn recording_gateway_records_and_fails_on_demand() {
        let gw = RecordingGateway::new();
        gw.open(&HardwareCommand::new(1, 2)).await.unwrap();
        assert_eq!(gw.last().unwrap().0, GatewayAction::Open);

        gw.set_failing(true);
        assert!(matches!(
            gw.check(&HardwareCommand::new(1, 2)).await,
            Err(GatewayError::Transport(_))
        ));
        assert_eq!(gw.sent().len(), 1);
    }
}
