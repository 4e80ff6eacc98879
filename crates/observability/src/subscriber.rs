//! Subscriber installation.
//!
//! JSON lines are the production format (one object per event, consumed by the
//! log shipper next to the cabinet); `text` is for a developer terminal.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Filter from `RUST_LOG`, or `default_directive` when unset or invalid.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. A second call leaves the first in place.
pub fn init_with(format: LogFormat, default_directive: &str) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Text => builder.with_target(true).try_init(),
    };
}
