//! # Stream Contract
//!
//! Every endpoint of the broker, whether a BBDO connection, a bus publisher
//! or a bus subscriber, is a [`Stream`]. Consumers and producers outside the
//! core only ever see this trait.
//!
//! Reads take an optional deadline. Reaching it yields
//! [`ReadOutcome::Timeout`] and leaves the stream usable; end of data yields
//! [`ReadOutcome::Closed`]. Neither is an error.

use crate::errors::StreamError;
use crate::event::SharedEvent;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Diagnostic key/value pairs reported by a stream.
pub type StreamStats = BTreeMap<String, String>;

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Event(SharedEvent),
    /// The deadline passed with nothing to deliver.
    Timeout,
    /// No more events will ever arrive.
    Closed,
}

impl ReadOutcome {
    #[must_use]
    pub fn into_event(self) -> Option<SharedEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Timeout | Self::Closed => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes handed to the layer below; in-memory streams report 0 or 1.
    Accepted(usize),
    /// Flow control refused the event; retry once the peer acknowledges.
    WindowFull,
}

/// The capability every endpoint implements.
#[async_trait]
pub trait Stream: Send {
    /// Wait for the next event until `deadline` (forever when `None`).
    async fn read(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome, StreamError>;

    async fn write(&mut self, event: SharedEvent) -> Result<WriteOutcome, StreamError>;

    /// Release resources. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), StreamError>;

    fn stats(&self) -> StreamStats;
}

/// Client side endpoint factory: dials and returns a ready stream.
#[async_trait]
pub trait Connector: Send + Sync {
    type Output: Stream;

    async fn open(&self) -> Result<Self::Output, StreamError>;
}

/// Server side endpoint factory: waits for a peer and returns a ready stream.
#[async_trait]
pub trait Acceptor: Send {
    type Output: Stream;

    async fn accept(&mut self) -> Result<Self::Output, StreamError>;
}
