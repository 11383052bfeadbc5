//! # Raw Transports
//!
//! The byte streams BBDO runs over. [`Transport`] is the closed set of
//! concrete kinds the broker dials or accepts; [`Dialer`] and [`Listener`]
//! are the seams connectors and acceptors are generic over, so tests can plug
//! in-memory pipes without a socket.

use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// A raw byte stream.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Memory(DuplexStream),
}

/// Two connected in-memory transports.
#[must_use]
pub fn memory_pair(max_buf_size: usize) -> (Transport, Transport) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (Transport::Memory(a), Transport::Memory(b))
}

impl Transport {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            #[cfg(unix)]
            Self::Unix(_) => "unix",
            Self::Memory(_) => "memory",
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Self::Memory(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Self::Memory(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
            Self::Memory(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Self::Memory(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Opens client-side byte streams.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self) -> io::Result<Self::Io>;

    /// Peer label used in logs and stats.
    fn describe(&self) -> String;
}

/// Yields server-side byte streams.
#[async_trait]
pub trait Listener: Send {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next peer; returns the stream and a peer label.
    async fn accept(&mut self) -> io::Result<(Self::Io, String)>;
}

#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Io = Transport;

    async fn dial(&self) -> io::Result<Transport> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(address: &str) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Listener for TcpServer {
    type Io = Transport;

    async fn accept(&mut self) -> io::Result<(Transport, String)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Transport::Tcp(stream), format!("tcp://{peer}")))
    }
}

#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixDialer {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Dialer for UnixDialer {
    type Io = Transport;

    async fn dial(&self) -> io::Result<Transport> {
        Ok(Transport::Unix(UnixStream::connect(&self.path).await?))
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

#[cfg(unix)]
#[derive(Debug)]
pub struct UnixServer {
    listener: UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixServer {
    pub fn bind(path: impl Into<std::path::PathBuf>) -> io::Result<Self> {
        let path = path.into();
        Ok(Self {
            listener: UnixListener::bind(&path)?,
            path,
        })
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for UnixServer {
    type Io = Transport;

    async fn accept(&mut self) -> io::Result<(Transport, String)> {
        let (stream, _) = self.listener.accept().await?;
        Ok((
            Transport::Unix(stream),
            format!("unix://{}", self.path.display()),
        ))
    }
}
