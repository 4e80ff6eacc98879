use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cabinet_core::DomainError;
use cabinet_infra::{EngineError, GatewayError};

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::NoSlotAvailable(_) => json_error(StatusCode::NOT_FOUND, "no_slot_available", message),
        EngineError::SensorBinding { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "sensor_binding", message)
        }
        EngineError::ChannelNotBound { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "channel_not_bound", message)
        }
        EngineError::AllocationRace(_) => json_error(StatusCode::CONFLICT, "allocation_race", message),
        EngineError::Dispatch(e) => gateway_error_to_response(e),
        EngineError::CorrelationNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "correlation_not_found", message)
        }
        EngineError::StockNotFound { .. } => json_error(StatusCode::NOT_FOUND, "stock_not_found", message),
        EngineError::Calibration { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "calibration_missing", message)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

pub fn gateway_error_to_response(err: GatewayError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "dispatch_failed", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
