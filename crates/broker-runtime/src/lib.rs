//! # Broker Runtime Library
//!
//! Configuration, endpoint wiring and forwarding tasks behind the
//! `broker-runtime` binary, exposed for integration tests.
//!
//! ```text
//!  input peers ──BBDO──→ Publisher ──→ Engine ──→ Subscriber ──BBDO──→ output peers
//! ```
//!
//! - `config` - TOML file plus environment overrides
//! - `endpoint` - one stream type over BBDO and bus endpoints
//! - `pump` - the read/write loop joining two streams
//! - `runtime` - engine ownership, endpoint tasks, graceful shutdown

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod endpoint;
pub mod pump;
pub mod runtime;

pub use config::{
    BrokerConfig, ConfigError, EndpointConfig, EndpointMode, EngineSection, TransportKind,
    DEFAULT_CONFIG_PATH,
};
pub use endpoint::{AnyDialer, AnyListener, EndpointStream};
pub use pump::{pump, PumpExit, PumpOptions, PumpReport, DEFAULT_POLL_INTERVAL};
pub use runtime::{BrokerRuntime, RuntimeError};
