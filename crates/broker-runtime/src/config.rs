//! # Broker Configuration
//!
//! One TOML file describes the engine and every endpoint.
//!
//! ```toml
//! [engine]
//! queue_max_size = 10000
//! spill_capacity = 100000
//! # Outputs that dial their peer spill to `<spill_dir>/<name>.spill` and
//! # replay it after a restart. Without it, spills are in memory.
//! spill_dir = "/var/lib/broker"
//!
//! [[inputs]]
//! name = "pollers"
//! mode = "listen"
//! address = "0.0.0.0:5669"
//!
//! [[outputs]]
//! name = "central-rrd"
//! mode = "connect"
//! address = "rrd.example.net:5670"
//! filter = ["storage", "neb:service_status"]
//! ack_limit = 500
//!
//! [[outputs.extensions]]
//! name = "compression"
//! optional = true
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `BROKER_CONFIG` | path of the file (default `broker.toml`, optional) |
//! | `BROKER_QUEUE_MAX_SIZE` | `engine.queue_max_size` |
//! | `BROKER_SPILL_CAPACITY` | `engine.spill_capacity` |
//! | `BROKER_SPILL_DIR` | `engine.spill_dir` |

use mb_02_bbdo::{BbdoConfig, Direction, Extension, DEFAULT_ACK_LIMIT, DEFAULT_MAX_PAYLOAD_SIZE};
use serde::Deserialize;
use shared_bus::{
    EngineConfig, EngineError, EventFilter, FilterError, DEFAULT_QUEUE_MAX_SIZE,
    DEFAULT_SPILL_CAPACITY,
};
use shared_types::EventRegistry;
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File read when `BROKER_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "broker.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var}={value:?} is not a valid value")]
    InvalidEnv { var: &'static str, value: String },

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("endpoint name '{0}' is used twice")]
    DuplicateEndpoint(String),

    #[error("endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("endpoint '{endpoint}': {source}")]
    Bbdo {
        endpoint: String,
        #[source]
        source: mb_02_bbdo::ConfigError,
    },

    #[error("endpoint '{endpoint}' filter: {source}")]
    Filter {
        endpoint: String,
        #[source]
        source: FilterError,
    },
}

/// Engine section of the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub queue_max_size: usize,
    pub spill_capacity: usize,
    pub spill_dir: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            queue_max_size: DEFAULT_QUEUE_MAX_SIZE,
            spill_capacity: DEFAULT_SPILL_CAPACITY,
            spill_dir: None,
        }
    }
}

impl EngineSection {
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            queue_max_size: self.queue_max_size,
            spill_capacity: self.spill_capacity,
            ..EngineConfig::default()
        }
    }
}

/// Whether the broker dials the peer or waits for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    Connect,
    Listen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Unix,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_ack_limit() -> u32 {
    DEFAULT_ACK_LIMIT
}

fn default_retry_ms() -> u64 {
    15_000
}

/// One BBDO endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub name: String,
    pub mode: EndpointMode,
    #[serde(default)]
    pub transport: TransportKind,
    /// `host:port` for TCP, a socket path for Unix.
    pub address: String,
    #[serde(default = "default_true")]
    pub negotiate: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub coarse: bool,
    #[serde(default = "default_ack_limit")]
    pub ack_limit: u32,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    /// Event selection: what an output subscribes to, or what an input
    /// lets onto the bus.
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(default)]
    pub queue_max_size: Option<usize>,
    #[serde(default)]
    pub spill_capacity: Option<usize>,
    /// Delay between reconnection attempts of a `connect` endpoint.
    #[serde(default = "default_retry_ms")]
    pub retry_interval_ms: u64,
}

impl EndpointConfig {
    /// BBDO settings for this endpoint used in `direction`.
    #[must_use]
    pub fn bbdo_config(&self, direction: Direction) -> BbdoConfig {
        BbdoConfig {
            negotiate: self.negotiate,
            timeout: Duration::from_millis(self.timeout_ms),
            direction,
            coarse: self.coarse,
            ack_limit: self.ack_limit,
            extensions: self.extensions.clone(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    pub fn event_filter(&self, registry: &EventRegistry) -> Result<EventFilter, ConfigError> {
        EventFilter::parse(&self.filter, registry).map_err(|source| ConfigError::Filter {
            endpoint: self.name.clone(),
            source,
        })
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidEndpoint {
            endpoint: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self, direction: Direction, registry: &EventRegistry) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(self.invalid("address is empty"));
        }
        if self.transport == TransportKind::Unix && !cfg!(unix) {
            return Err(self.invalid("unix sockets are not available on this platform"));
        }
        if self.queue_max_size == Some(0) {
            return Err(self.invalid("queue_max_size must be at least 1"));
        }
        if self.mode == EndpointMode::Connect && self.retry_interval_ms == 0 {
            return Err(self.invalid("retry_interval_ms must be non-zero"));
        }
        self.bbdo_config(direction)
            .validate()
            .map_err(|source| ConfigError::Bbdo {
                endpoint: self.name.clone(),
                source,
            })?;
        self.event_filter(registry)?;
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    #[serde(default)]
    pub engine: EngineSection,
    /// Peers whose events are published on the bus.
    #[serde(default)]
    pub inputs: Vec<EndpointConfig>,
    /// Peers fed from a bus subscription.
    #[serde(default)]
    pub outputs: Vec<EndpointConfig>,
}

impl BrokerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from `BROKER_CONFIG` (or `broker.toml` if present), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| env::var(key).ok();
        let mut config = match lookup("BROKER_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse(var: &'static str, value: String) -> Result<usize, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })
        }
        if let Some(value) = lookup("BROKER_QUEUE_MAX_SIZE") {
            self.engine.queue_max_size = parse("BROKER_QUEUE_MAX_SIZE", value)?;
        }
        if let Some(value) = lookup("BROKER_SPILL_CAPACITY") {
            self.engine.spill_capacity = parse("BROKER_SPILL_CAPACITY", value)?;
        }
        if let Some(value) = lookup("BROKER_SPILL_DIR") {
            self.engine.spill_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Check everything that can be checked before binding any socket.
    pub fn validate(&self, registry: &EventRegistry) -> Result<(), ConfigError> {
        self.engine.to_engine_config().validate()?;
        let mut names = BTreeSet::new();
        let endpoints = self
            .inputs
            .iter()
            .map(|e| (e, Direction::Input))
            .chain(self.outputs.iter().map(|e| (e, Direction::Output)));
        for (endpoint, direction) in endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(endpoint.invalid("name is empty"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name.clone()));
            }
            endpoint.validate(direction, registry)?;
        }
        Ok(())
    }
}
