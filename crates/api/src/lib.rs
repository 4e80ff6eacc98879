//! HTTP API: stock operations, hardware callbacks and gateway pass-through.

pub mod app;
pub mod middleware;
