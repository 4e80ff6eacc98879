//! Hardware gateway callbacks.
//!
//! The gateway does not retry, so every callback it can parse is answered
//! 200 even when reconciliation rejects it; the outcome is logged and echoed
//! in the body for operators.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use cabinet_events::Notification;
use cabinet_infra::{EngineError, ReconcileOutcome, WebhookPayload};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/card", post(card))
        .route("/weight", post(weight))
        .route("/weight/check", post(check))
        .route("/barcode", post(scanner))
        .route("/qrcode", post(scanner))
        .route("/finger", post(finger))
        .route("/weight/zero", post(zero))
        .route("/weight/measure", post(measure))
        .route("/box/status", post(box_status))
        .route("/door/status", post(door_status))
        .route("/light/status", post(light))
}

fn ok(extra: Value) -> axum::response::Response {
    let mut body = json!({ "ok": true });
    if let (Some(obj), Value::Object(more)) = (body.as_object_mut(), extra) {
        obj.extend(more);
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn reconcile(services: &AppServices, payload: &WebhookPayload) -> axum::response::Response {
    match services.engine().reconcile(payload) {
        Ok(ReconcileOutcome::WeighOnly) => ok(json!({ "reconciled": false })),
        Ok(ReconcileOutcome::Reconciled(op)) | Ok(ReconcileOutcome::Checked(op)) => ok(json!({
            "reconciled": true,
            "operationId": op.id,
            "qty": op.qty,
        })),
        Err(e) => {
            match &e {
                EngineError::CorrelationNotFound(_) => info!(error = %e, "callback not correlated"),
                _ => warn!(error = %e, "callback rejected"),
            }
            ok(json!({ "reconciled": false, "reason": e.to_string() }))
        }
    }
}

pub async fn card(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CallbackEnvelope>,
) -> axum::response::Response {
    let card = body.data.map(|d| d.card).unwrap_or_default();
    if card.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "card is empty");
    }
    info!(card = %card, "card callback");
    services.publish(Notification::CardScanned { card });
    ok(json!({}))
}

pub async fn weight(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CallbackEnvelope>,
) -> axum::response::Response {
    let Some(payload) = body.data else {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "callback data is empty");
    };
    info!(
        uuid = %payload.uuid,
        box_id = payload.box_id,
        grid_id = payload.grid_id,
        operation = payload.operation,
        weight = payload.weight,
        "weight callback"
    );

    services.publish(Notification::Weight(json!(payload.weight)));
    reconcile(&services, &payload)
}

pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Json(payload): Json<WebhookPayload>,
) -> axum::response::Response {
    info!(uuid = %payload.uuid, weight = payload.weight, "check callback");
    reconcile(&services, &payload)
}

pub async fn scanner(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CallbackEnvelope>,
) -> axum::response::Response {
    let data = body.data.unwrap_or_default();
    info!(code = %data.code, "scanner callback");
    services.publish(Notification::Scanner(json!({ "code": data.code, "boxId": data.box_id })));
    ok(json!({}))
}

pub async fn finger(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    services.publish(Notification::Finger(body));
    ok(json!({}))
}

pub async fn zero(Extension(services): Extension<Arc<AppServices>>, body: String) -> axum::response::Response {
    services.publish(Notification::Zero(dto::raw_body(body)));
    ok(json!({}))
}

pub async fn measure(Extension(services): Extension<Arc<AppServices>>, body: String) -> axum::response::Response {
    services.publish(Notification::Measure(dto::raw_body(body)));
    ok(json!({}))
}

pub async fn box_status(
    Extension(services): Extension<Arc<AppServices>>,
    body: String,
) -> axum::response::Response {
    services.publish(Notification::BoxStatus(dto::raw_body(body)));
    ok(json!({}))
}

pub async fn door_status(
    Extension(services): Extension<Arc<AppServices>>,
    body: String,
) -> axum::response::Response {
    services.publish(Notification::DoorStatus(dto::raw_body(body)));
    ok(json!({}))
}

pub async fn light(Extension(services): Extension<Arc<AppServices>>, body: String) -> axum::response::Response {
    services.publish(Notification::Light(dto::raw_body(body)));
    ok(json!({}))
}
