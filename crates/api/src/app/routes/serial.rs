//! Pass-through to the hardware gateway, validated like the cabinet UI expects.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use cabinet_infra::{GatewayAction, HardwareCommand, engine::UNDEFINED_TOKEN};
use cabinet_inventory::{HW_OP_COUNT, HW_OP_UNWEIGHED, HW_OP_WEIGH};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const LIGHT_OFF: i64 = 0;
const LIGHT_ON: i64 = 1;

pub fn router() -> Router {
    Router::new()
        .route("/open", post(open))
        .route("/weight", post(weigh))
        .route("/weight/zero", post(zero))
        .route("/weight/measure", post(measure))
        .route("/weight/check", post(check))
        .route("/light", post(light))
        .route("/box/:id/status", get(box_status))
}

async fn forward(
    services: &AppServices,
    action: GatewayAction,
    command: Result<HardwareCommand, axum::response::Response>,
) -> axum::response::Response {
    let command = match command {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match services.gateway().send(action, &command).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "ok": true, "data": data }))).into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}

pub async fn open(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    let cmd = body.into_command(&[HW_OP_UNWEIGHED, HW_OP_WEIGH, HW_OP_COUNT]);
    forward(&services, GatewayAction::Open, cmd).await
}

pub async fn weigh(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    forward(&services, GatewayAction::Weigh, body.into_command(&[])).await
}

pub async fn zero(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    forward(&services, GatewayAction::Zero, body.into_command(&[])).await
}

pub async fn measure(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    if body.weight.unwrap_or(0) <= 0 {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "weight must be positive");
    }
    forward(&services, GatewayAction::Measure, body.into_command(&[])).await
}

/// Manual check of one grid. Not correlated with any operation, so the
/// result comes back under the "undefined" token.
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Json(mut body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    if body.uuid.as_deref().is_none_or(str::is_empty) {
        body.uuid = Some(UNDEFINED_TOKEN.to_string());
    }
    forward(&services, GatewayAction::Check, body.into_command(&[])).await
}

pub async fn light(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SerialRequest>,
) -> axum::response::Response {
    forward(&services, GatewayAction::Light, body.into_command(&[LIGHT_OFF, LIGHT_ON])).await
}

pub async fn box_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    if id <= 0 {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "boxId must be positive");
    }
    match services.gateway().box_status(id).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "ok": true, "data": data }))).into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}
