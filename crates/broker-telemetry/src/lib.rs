//! # Broker Telemetry
//!
//! Structured logging for every broker crate, on top of `tracing`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     tracing::info!("broker starting");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BROKER_LOG_LEVEL` | `RUST_LOG`, then `info` | Filter directive |
//! | `BROKER_JSON_LOGS` | `false` (`true` in containers) | JSON lines output |
//! | `BROKER_CONSOLE_OUTPUT` | `true` | Disable to silence output |
//! | `BROKER_LOG_SOURCE` | `false` | Add file and line |
//! | `BROKER_SERVICE_NAME` | `monitoring-broker` | Service name |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::env_filter;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter {0}")]
    Filter(String),

    #[error("Failed to install log subscriber: {0}")]
    Init(String),
}

/// Install logging for the whole process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    logging::init_logging(config)
}

/// Convenience macro for creating a span around one endpoint's work.
///
/// # Example
///
/// ```rust,ignore
/// let _span = endpoint_span!("central-rrd", direction = "output").entered();
/// ```
#[macro_export]
macro_rules! endpoint_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::info_span!("endpoint", endpoint = %$name $(, $($field)*)?)
    };
}
