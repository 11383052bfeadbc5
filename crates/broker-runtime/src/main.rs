//! # Monitoring Broker
//!
//! Entry point of the broker daemon.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (`BROKER_LOG_LEVEL`, `BROKER_JSON_LOGS`, ...)
//! 2. Load configuration (`BROKER_CONFIG` or `broker.toml`)
//! 3. Bind listeners, start the engine, spawn endpoint tasks
//! 4. Run until Ctrl+C, then drain outputs and stop

use std::time::Duration;

use anyhow::{Context, Result};
use broker_runtime::{BrokerConfig, BrokerRuntime};
use broker_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

/// Upper bound on how long outputs may keep draining after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("failed to initialize logging")?;

    let config = BrokerConfig::load().context("failed to load broker configuration")?;
    let mut runtime = BrokerRuntime::new(config).context("invalid broker configuration")?;

    info!("===========================================");
    info!("  Monitoring Broker v{}", env!("CARGO_PKG_VERSION"));
    info!("  Service: {}", telemetry.service_name);
    info!("===========================================");

    runtime.start().await.context("failed to start endpoints")?;

    info!("Broker is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    runtime.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
