//! # Connectors and Acceptors
//!
//! Factories that turn raw transports into negotiated [`BbdoStream`]s.

use crate::config::{BbdoConfig, ConfigError};
use crate::stream::{BbdoStream, Role};
use crate::transport::{Dialer, Listener};
use async_trait::async_trait;
use mb_01_event_codec::EventCodec;
use shared_types::{Acceptor, Connector, StreamError};
use std::io;
use tokio::time::timeout;
use tracing::{debug, info};

/// Client side factory: dials, then negotiates before handing the stream out.
#[derive(Debug)]
pub struct BbdoConnector<D> {
    dialer: D,
    codec: EventCodec,
    config: BbdoConfig,
}

impl<D: Dialer> BbdoConnector<D> {
    pub fn new(dialer: D, codec: EventCodec, config: BbdoConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            dialer,
            codec,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BbdoConfig {
        &self.config
    }
}

#[async_trait]
impl<D: Dialer> Connector for BbdoConnector<D> {
    type Output = BbdoStream<D::Io>;

    async fn open(&self) -> Result<Self::Output, StreamError> {
        let peer = self.dialer.describe();
        debug!(peer = %peer, "Dialing BBDO peer");
        let io = match timeout(self.config.timeout, self.dialer.dial()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {peer} timed out after {:?}", self.config.timeout),
                )))
            }
        };
        let mut stream = BbdoStream::new(io, Role::Client, self.codec.clone(), self.config.clone())
            .with_peer(peer);
        stream.negotiate().await?;
        info!(peer = %stream.peer(), "BBDO connection opened");
        Ok(stream)
    }
}

/// Server side factory over a [`Listener`].
#[derive(Debug)]
pub struct BbdoAcceptor<L> {
    listener: L,
    codec: EventCodec,
    config: BbdoConfig,
}

impl<L: Listener> BbdoAcceptor<L> {
    pub fn new(listener: L, codec: EventCodec, config: BbdoConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            listener,
            codec,
            config,
        })
    }

    #[must_use]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Accept a peer without running the handshake.
    ///
    /// The stream negotiates on its first read or write, which keeps a slow
    /// peer from stalling the accept loop.
    pub async fn accept_pending(&mut self) -> Result<BbdoStream<L::Io>, StreamError> {
        let (io, peer) = self.listener.accept().await?;
        debug!(peer = %peer, "BBDO peer accepted");
        Ok(BbdoStream::new(io, Role::Server, self.codec.clone(), self.config.clone()).with_peer(peer))
    }
}

#[async_trait]
impl<L: Listener> Acceptor for BbdoAcceptor<L> {
    type Output = BbdoStream<L::Io>;

    async fn accept(&mut self) -> Result<Self::Output, StreamError> {
        let mut stream = self.accept_pending().await?;
        stream.negotiate().await?;
        Ok(stream)
    }
}
