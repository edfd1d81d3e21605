//! DGRID Account Service Entry Point
//!
//! Runs an account record service against the embedded in-memory grid,
//! configured from `DGRID_*` environment variables.

use std::sync::Arc;

use dgrid_api::telemetry::{init_tracing, TelemetryConfig};
use dgrid_api::{ApiResult, DataGridService, EventBus};
use dgrid_core::{AccountRecord, ServiceConfig};
use dgrid_storage::InMemoryGrid;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ServiceConfig::from_env()?;
    let bus = EventBus::new(config.request_timeout);
    let grid = InMemoryGrid::new();

    let service: DataGridService<AccountRecord> =
        DataGridService::new(config, bus, Arc::new(grid))?;
    service.start().await?;

    match service.http_local_addr().await {
        Some(addr) => tracing::info!(%addr, address = %service.address(), "Account service ready"),
        None => tracing::warn!(address = %service.address(), "Account service ready without HTTP"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    service.stop().await
}
