//! # BBDO Endpoint Configuration

use crate::negotiation::Extension;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ACK_LIMIT: u32 = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest event payload a frame chain may reassemble to.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Which way events flow through the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Events are read from the peer.
    Input,
    /// Events are written to the peer.
    Output,
    #[default]
    Both,
}

impl Direction {
    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, Self::Input | Self::Both)
    }

    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::Output | Self::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("ack_limit must be at least 1")]
    ZeroAckLimit,

    #[error("timeout must be non-zero")]
    ZeroTimeout,

    #[error("max_payload_size must be at least 1")]
    ZeroMaxPayload,

    #[error("extension '{0}' declared twice")]
    DuplicateExtension(String),

    #[error("extension '{0}' is declared both optional and mandatory")]
    ConflictingFlags(String),
}

/// Settings shared by connectors and acceptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BbdoConfig {
    /// Exchange version and extensions before any event.
    pub negotiate: bool,
    /// Bound on connecting and on the handshake.
    pub timeout: Duration,
    pub direction: Direction,
    /// Skip checksum verification on read.
    pub coarse: bool,
    pub ack_limit: u32,
    /// Declared extensions, in preference order.
    pub extensions: Vec<Extension>,
    /// Bound on a reassembled frame chain; longer chains close the stream.
    pub max_payload_size: usize,
}

impl Default for BbdoConfig {
    fn default() -> Self {
        Self {
            negotiate: true,
            timeout: DEFAULT_TIMEOUT,
            direction: Direction::Both,
            coarse: false,
            ack_limit: DEFAULT_ACK_LIMIT,
            extensions: Vec::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl BbdoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_limit == 0 {
            return Err(ConfigError::ZeroAckLimit);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::ZeroMaxPayload);
        }
        let mut seen = BTreeSet::new();
        for ext in &self.extensions {
            if !seen.insert(ext.name.as_str()) {
                return Err(ConfigError::DuplicateExtension(ext.name.clone()));
            }
            if ext.optional && ext.mandatory {
                return Err(ConfigError::ConflictingFlags(ext.name.clone()));
            }
        }
        Ok(())
    }
}
