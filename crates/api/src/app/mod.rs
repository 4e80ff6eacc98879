//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: engine, catalog and bus wiring
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and their validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router().layer(Extension(services)))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_log)))
}
