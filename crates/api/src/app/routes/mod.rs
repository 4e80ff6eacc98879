use axum::Router;

pub mod callback;
pub mod serial;
pub mod stock;
pub mod system;

/// Router for every endpoint that needs the shared services.
pub fn router() -> Router {
    Router::new()
        .nest("/stock", stock::router())
        .nest("/callback", callback::router())
        .nest("/serial", serial::router())
}
