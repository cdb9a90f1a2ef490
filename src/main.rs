use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use viewcounter::analytics::GeoIpService;
use viewcounter::api::{create_router, AppState};
use viewcounter::config::Config;
use viewcounter::{provision, storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("viewcounter=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        tenants = config.allowed.app_ids.len(),
        window_hours = config.unique_visitor_window_hours,
        "loaded configuration"
    );

    let tenants = Arc::new(config.allowed.tenant_registry()?);
    let storage = storage::connect(&config.database).await?;

    info!("provisioning tenant relations...");
    let report = provision::initialize(storage.as_ref(), &tenants).await?;
    info!(tenants = report.tenants.len(), "provisioning complete");

    let geoip = GeoIpService::new(config.analytics.geoip_db_path.as_deref())?;
    if geoip.is_enabled() {
        info!("GeoIP country lookup enabled");
    } else {
        warn!("GEOIP_DB_PATH not set, countries will not be recorded");
    }

    let state = Arc::new(AppState::new(&config, Arc::clone(&storage), tenants, geoip));
    let router = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("view counter listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutting down, closing storage pool");
    storage.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
