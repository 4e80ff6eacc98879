use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};

/// Log one line per request with its status and latency.
pub async fn request_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), elapsed_ms, "request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), elapsed_ms, "request");
    }
    response
}
