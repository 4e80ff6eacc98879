use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use cabinet_core::OperationId;
use cabinet_inventory::OperationKind;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/in", post(stock_in))
        .route("/out", post(stock_out))
        .route("/recycle", post(stock_recycle))
        .route("/auto", post(auto_inventory))
        .route("/operations/:id", get(get_operation))
}

pub async fn stock_in(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockRequestBody>,
) -> axum::response::Response {
    open(services, body, OperationKind::In).await
}

pub async fn stock_out(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockRequestBody>,
) -> axum::response::Response {
    open(services, body, OperationKind::Out).await
}

pub async fn stock_recycle(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockRequestBody>,
) -> axum::response::Response {
    open(services, body, OperationKind::Recycle).await
}

async fn open(
    services: Arc<AppServices>,
    body: dto::StockRequestBody,
    kind: OperationKind,
) -> axum::response::Response {
    let request = match body.into_request(kind) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.engine().open_operation(request).await {
        Ok(opened) => (StatusCode::OK, Json(opened)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn auto_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::AutoInventoryRequest>,
) -> axum::response::Response {
    let (box_id, account) = match body.ids() {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    info!(box_id = %box_id, "inventory check requested");
    match services.engine().run_inventory_check(box_id, account).await {
        Ok(operations) => (
            StatusCode::OK,
            Json(serde_json::json!({ "operations": operations })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_operation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OperationId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid operation id");
        }
    };

    match services.engine().operation(id) {
        Some(op) => (StatusCode::OK, Json(op)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "operation not found"),
    }
}
