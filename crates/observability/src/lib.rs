//! Process-wide tracing setup shared by the service binaries.

pub mod subscriber;

pub use subscriber::{LogFormat, init_with};

/// Initialize tracing from the environment (`RUST_LOG`, `LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_with(format, "info");
}
