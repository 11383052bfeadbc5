//! # Endpoint Streams
//!
//! The closed set of stream kinds the runtime moves events between, plus the
//! transport selection behind each configured address.

use crate::config::{EndpointConfig, TransportKind};
use async_trait::async_trait;
use mb_02_bbdo::{BbdoStream, Dialer, Listener, TcpDialer, TcpServer, Transport};
#[cfg(unix)]
use mb_02_bbdo::{UnixDialer, UnixServer};
use shared_bus::{Publisher, Subscriber};
use shared_types::{ReadOutcome, SharedEvent, Stream, StreamError, StreamStats, WriteOutcome};
use std::io;
use std::time::Duration;
use tokio::time::Instant;

/// How long a publisher held back by the bus backlog waits when no
/// deadline is given.
const BACKLOG_RETRY: Duration = Duration::from_millis(50);

/// Any stream an endpoint task may hold.
#[derive(Debug)]
pub enum EndpointStream {
    Bbdo(Box<BbdoStream<Transport>>),
    Publisher(Publisher),
    Subscriber(Subscriber),
}

impl EndpointStream {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bbdo(_) => "bbdo",
            Self::Publisher(_) => "publisher",
            Self::Subscriber(_) => "subscriber",
        }
    }

    /// Write, waiting out flow control until `deadline`.
    ///
    /// BBDO streams wait for the peer's ack. A publisher held back by a full
    /// bus backlog sleeps until `deadline` before answering
    /// [`WriteOutcome::WindowFull`], so callers can simply retry.
    pub async fn write_until(
        &mut self,
        event: SharedEvent,
        deadline: Option<Instant>,
    ) -> Result<WriteOutcome, StreamError> {
        match self {
            Self::Bbdo(stream) => stream.write_wait(event, deadline).await,
            Self::Publisher(stream) => {
                let outcome = stream.write(event).await?;
                if outcome == WriteOutcome::WindowFull {
                    let retry_at = deadline.unwrap_or_else(|| Instant::now() + BACKLOG_RETRY);
                    tokio::time::sleep_until(retry_at).await;
                }
                Ok(outcome)
            }
            Self::Subscriber(stream) => stream.write(event).await,
        }
    }

    /// Events written to the peer but never acknowledged, oldest first.
    /// Empty for bus streams.
    pub fn take_in_flight(&mut self) -> Vec<SharedEvent> {
        match self {
            Self::Bbdo(stream) => stream.take_in_flight(),
            Self::Publisher(_) | Self::Subscriber(_) => Vec::new(),
        }
    }
}

impl From<BbdoStream<Transport>> for EndpointStream {
    fn from(stream: BbdoStream<Transport>) -> Self {
        Self::Bbdo(Box::new(stream))
    }
}

impl From<Publisher> for EndpointStream {
    fn from(stream: Publisher) -> Self {
        Self::Publisher(stream)
    }
}

impl From<Subscriber> for EndpointStream {
    fn from(stream: Subscriber) -> Self {
        Self::Subscriber(stream)
    }
}

#[async_trait]
impl Stream for EndpointStream {
    async fn read(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome, StreamError> {
        match self {
            Self::Bbdo(stream) => stream.read(deadline).await,
            Self::Publisher(stream) => stream.read(deadline).await,
            Self::Subscriber(stream) => stream.read(deadline).await,
        }
    }

    async fn write(&mut self, event: SharedEvent) -> Result<WriteOutcome, StreamError> {
        match self {
            Self::Bbdo(stream) => stream.write(event).await,
            Self::Publisher(stream) => stream.write(event).await,
            Self::Subscriber(stream) => stream.write(event).await,
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Bbdo(stream) => stream.close().await,
            Self::Publisher(stream) => stream.close().await,
            Self::Subscriber(stream) => stream.close().await,
        }
    }

    fn stats(&self) -> StreamStats {
        match self {
            Self::Bbdo(stream) => stream.stats(),
            Self::Publisher(stream) => stream.stats(),
            Self::Subscriber(stream) => stream.stats(),
        }
    }
}

/// Dialer chosen from an endpoint's transport.
#[derive(Debug, Clone)]
pub enum AnyDialer {
    Tcp(TcpDialer),
    #[cfg(unix)]
    Unix(UnixDialer),
}

impl AnyDialer {
    pub fn for_endpoint(endpoint: &EndpointConfig) -> io::Result<Self> {
        match endpoint.transport {
            TransportKind::Tcp => Ok(Self::Tcp(TcpDialer::new(endpoint.address.clone()))),
            #[cfg(unix)]
            TransportKind::Unix => Ok(Self::Unix(UnixDialer::new(&endpoint.address))),
            #[cfg(not(unix))]
            TransportKind::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }
}

#[async_trait]
impl Dialer for AnyDialer {
    type Io = Transport;

    async fn dial(&self) -> io::Result<Transport> {
        match self {
            Self::Tcp(dialer) => dialer.dial().await,
            #[cfg(unix)]
            Self::Unix(dialer) => dialer.dial().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Tcp(dialer) => dialer.describe(),
            #[cfg(unix)]
            Self::Unix(dialer) => dialer.describe(),
        }
    }
}

/// Listener chosen from an endpoint's transport.
#[derive(Debug)]
pub enum AnyListener {
    Tcp(TcpServer),
    #[cfg(unix)]
    Unix(UnixServer),
}

impl AnyListener {
    pub async fn bind(endpoint: &EndpointConfig) -> io::Result<Self> {
        match endpoint.transport {
            TransportKind::Tcp => Ok(Self::Tcp(TcpServer::bind(&endpoint.address).await?)),
            #[cfg(unix)]
            TransportKind::Unix => Ok(Self::Unix(UnixServer::bind(&endpoint.address)?)),
            #[cfg(not(unix))]
            TransportKind::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }

    /// Bound address, for TCP listeners.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Self::Tcp(server) => server.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix(_) => None,
        }
    }
}

#[async_trait]
impl Listener for AnyListener {
    type Io = Transport;

    async fn accept(&mut self) -> io::Result<(Transport, String)> {
        match self {
            Self::Tcp(server) => server.accept().await,
            #[cfg(unix)]
            Self::Unix(server) => server.accept().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::{Engine, EngineConfig, SubscriberConfig};
    use shared_types::catalogue::neb::Instance;
    use shared_types::Event;

    #[tokio::test]
    async fn test_enum_delegates_to_bus_streams() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.start();
        let mut output: EndpointStream = engine
            .subscribe(SubscriberConfig::new("out"))
            .unwrap()
            .into();
        let mut input: EndpointStream = engine.publisher("in").into();
        assert_eq!(input.kind(), "publisher");
        assert_eq!(output.kind(), "subscriber");

        let event = Event::new(Instance {
            name: "central".into(),
            ..Instance::default()
        })
        .into_shared();
        input.write_until(event.clone(), None).await.unwrap();
        assert_eq!(output.read(None).await.unwrap(), ReadOutcome::Event(event));
        assert_eq!(output.stats().get("kind").map(String::as_str), Some("subscriber"));

        output.close().await.unwrap();
        assert_eq!(engine.subscriber_count(), 0);
    }
}
