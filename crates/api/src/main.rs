use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use cabinet_api::app::{build_app, services::AppServices};
use cabinet_infra::{CardReaderLine, CatalogSeed, CorrelationSweeper, HttpGateway, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cabinet_observability::init();

    let config = ServiceConfig::from_env();
    info!(?config, "starting cabinet service");

    let seed = match &config.catalog_path {
        Some(path) => CatalogSeed::from_path(path).context("failed to load catalog seed")?,
        None => {
            warn!("CATALOG_PATH not set; starting with an empty catalog");
            CatalogSeed::default()
        }
    };

    let gateway = HttpGateway::new(config.gateway_url.clone(), config.gateway_timeout)
        .context("failed to build hardware gateway client")?;
    let services = Arc::new(AppServices::in_memory(
        &seed,
        Arc::new(gateway),
        config.engine_config(),
    ));

    let sweeper = CorrelationSweeper::default()
        .with_interval(config.sweep_interval)
        .spawn("correlation-sweeper", services.engine().clone())
        .context("failed to spawn correlation sweeper")?;

    let card_reader = match &config.card_reader_device {
        Some(device) => Some(
            CardReaderLine::open(device, config.card_reader_poll, services.bus().clone())
                .with_context(|| format!("failed to open card reader {}", device.display()))?,
        ),
        None => None,
    };

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server error")?;

    sweeper.shutdown();
    if let Some(line) = card_reader {
        line.shutdown();
    }
    Ok(())
}
