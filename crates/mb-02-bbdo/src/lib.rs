//! # BBDO Protocol
//!
//! Binary event transport between broker instances and their peers.
//!
//! ## Layers
//!
//! | Layer | Module | Role |
//! |-------|--------|------|
//! | Transport | [`transport`] | TCP, Unix socket or in-memory byte streams |
//! | Framing | [`frame`], [`checksum`] | 16-byte headers, CRC-16, continuation chains |
//! | Handshake | [`negotiation`] | version check, extension intersection, ack window |
//! | Flow control | [`window`] | unacknowledged event accounting |
//! | Stream | [`stream`] | the [`Stream`](shared_types::Stream) implementation |
//! | Factories | [`connector`] | [`Connector`](shared_types::Connector) / [`Acceptor`](shared_types::Acceptor) |
//!
//! ## Example
//!
//! ```no_run
//! use mb_01_event_codec::EventCodec;
//! use mb_02_bbdo::{BbdoConfig, BbdoConnector, TcpDialer};
//! use shared_types::{Connector, EventRegistry, Stream};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let codec = EventCodec::new(Arc::new(EventRegistry::builtin()));
//! let connector = BbdoConnector::new(TcpDialer::new("127.0.0.1:5669"), codec, BbdoConfig::default())?;
//! let mut stream = connector.open().await?;
//! stream.close().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod checksum;
pub mod config;
pub mod connector;
pub mod frame;
pub mod negotiation;
pub mod stream;
pub mod transport;
pub mod window;

pub use config::{
    BbdoConfig, ConfigError, Direction, DEFAULT_ACK_LIMIT, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_TIMEOUT,
};
pub use connector::{BbdoAcceptor, BbdoConnector};
pub use negotiation::{Extension, Negotiated, ProtocolVersion, PROTOCOL_VERSION};
pub use stream::{BbdoStream, Role, StreamState};
pub use transport::{memory_pair, Dialer, Listener, TcpDialer, TcpServer, Transport};
#[cfg(unix)]
pub use transport::{UnixDialer, UnixServer};
