//! Service configuration from environment variables.
//!
//! Every setting has a default. Values that fail to parse are reported with a
//! warning and replaced by the default so a typo never keeps the cabinet
//! offline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use cabinet_inventory::MissingStockPolicy;

use crate::engine::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub gateway_url: String,
    pub gateway_timeout: Duration,
    pub pending_ttl: Duration,
    pub sweep_interval: Duration,
    pub missing_stock: MissingStockPolicy,
    /// Serial device of the card reader; no reader thread when unset.
    pub card_reader_device: Option<PathBuf>,
    pub card_reader_poll: Duration,
    /// JSON seed for the in-memory catalog.
    pub catalog_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            gateway_url: "http://127.0.0.1:9000".to_string(),
            gateway_timeout: Duration::from_millis(5000),
            pending_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            missing_stock: MissingStockPolicy::InboundOnly,
            card_reader_device: None,
            card_reader_poll: Duration::from_millis(1000),
            catalog_path: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr),
            gateway_url: get("GATEWAY_URL").unwrap_or(defaults.gateway_url),
            gateway_timeout: Duration::from_millis(parse_or(
                get("GATEWAY_TIMEOUT_MS"),
                "GATEWAY_TIMEOUT_MS",
                defaults.gateway_timeout.as_millis() as u64,
            )),
            pending_ttl: Duration::from_secs(parse_or(
                get("PENDING_TTL_SECS"),
                "PENDING_TTL_SECS",
                defaults.pending_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(
                parse_or(
                    get("SWEEP_INTERVAL_SECS"),
                    "SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )
                .max(1),
            ),
            missing_stock: parse_or(
                get("MISSING_STOCK_POLICY"),
                "MISSING_STOCK_POLICY",
                defaults.missing_stock,
            ),
            card_reader_device: get("CARD_READER_DEVICE").map(PathBuf::from),
            card_reader_poll: Duration::from_millis(parse_or(
                get("CARD_READER_POLL_MS"),
                "CARD_READER_POLL_MS",
                defaults.card_reader_poll.as_millis() as u64,
            )),
            catalog_path: get("CATALOG_PATH").map(PathBuf::from),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_pending_ttl(self.pending_ttl)
            .with_missing_stock(self.missing_stock)
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(key, value = %raw, error = %e, "invalid setting; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(ServiceConfig::from_lookup(|_| None), ServiceConfig::default());
    }

    #[test]
    fn settings_are_read_from_lookup() {
        let cfg = ServiceConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:3000"),
            ("GATEWAY_URL", "http://10.0.0.2:8000"),
            ("PENDING_TTL_SECS", "60"),
            ("MISSING_STOCK_POLICY", "adopt_reading"),
            ("CARD_READER_DEVICE", "/dev/ttyUSB0"),
            ("CATALOG_PATH", " catalog.json "),
        ]));
        assert_eq!(cfg.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(cfg.gateway_url, "http://10.0.0.2:8000");
        assert_eq!(cfg.pending_ttl, Duration::from_secs(60));
        assert_eq!(cfg.missing_stock, MissingStockPolicy::AdoptReading);
        assert_eq!(cfg.card_reader_device, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(cfg.catalog_path, Some(PathBuf::from("catalog.json")));

        let engine = cfg.engine_config();
        assert_eq!(engine.pending_ttl, Duration::from_secs(60));
        assert_eq!(engine.missing_stock, MissingStockPolicy::AdoptReading);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = ServiceConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "not-an-addr"),
            ("GATEWAY_TIMEOUT_MS", "-5"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("MISSING_STOCK_POLICY", "whatever"),
        ]));
        let defaults = ServiceConfig::default();
        assert_eq!(cfg.bind_addr, defaults.bind_addr);
        assert_eq!(cfg.gateway_timeout, defaults.gateway_timeout);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
        assert_eq!(cfg.missing_stock, MissingStockPolicy::InboundOnly);
    }
}
