//! # BBDO Protocol Stream
//!
//! A [`Stream`] layered over any byte substream.
//!
//! ```text
//!  Init ──negotiate()──▶ Negotiating ──ok──▶ Established ──EOF / close / fatal──▶ Closed
//!    │                        │
//!    └──(negotiation off)─────┴──────────────▶ Established
//! ```
//!
//! Negotiation runs eagerly when a connector or acceptor hands the stream
//! out, or lazily on the first read or write otherwise.
//!
//! ## Flow control
//!
//! A writer may have at most `ack_limit` events unacknowledged. When the
//! window is full, [`Stream::write`] first drains any ack already sitting in
//! the substream and otherwise answers [`WriteOutcome::WindowFull`];
//! [`BbdoStream::write_wait`] blocks until an ack arrives instead. The reader
//! acknowledges every `ack_limit` consumed events, whatever it has consumed
//! before it waits on the substream, and once more on close.
//!
//! Written events stay in an in-flight list until acknowledged;
//! [`BbdoStream::take_in_flight`] hands them back after a failure so they
//! can be replayed on a new connection.
//!
//! ## Failure
//!
//! Framing and decoding errors leave the byte offset untrustworthy, so they
//! close the stream. The error is returned once; later reads report
//! [`ReadOutcome::Closed`]. A handshake abandoned half way (its future
//! dropped on a timeout) fails the stream the next time it is used.

use crate::config::BbdoConfig;
use crate::frame::{self, FrameAssembler, ParseResult};
use crate::negotiation::{negotiate, Handshake, Negotiated, PROTOCOL_VERSION};
use crate::window::AckWindow;
use async_trait::async_trait;
use bytes::BytesMut;
use mb_01_event_codec::EventCodec;
use shared_types::catalogue::internal::{Ack, Ping, VersionResponse};
use shared_types::{
    Event, MappedEvent, ReadOutcome, SharedEvent, Stream, StreamError, StreamStats, WriteOutcome,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Negotiating,
    Established,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Negotiating => "negotiating",
            Self::Established => "established",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which side speaks first during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connector side: sends its handshake, then reads the peer's.
    Client,
    /// Acceptor side: reads the peer's handshake, then answers.
    Server,
}

enum Frame {
    Event(Event),
    Timeout,
    Eof,
}

pub struct BbdoStream<T> {
    io: T,
    codec: EventCodec,
    config: BbdoConfig,
    role: Role,
    peer: String,
    state: StreamState,
    read_buf: BytesMut,
    assembler: FrameAssembler,
    write_buf: BytesMut,
    /// User events that arrived while the writer was polling for acks.
    inbound: VecDeque<SharedEvent>,
    /// Written user events the peer has not acknowledged yet.
    in_flight: VecDeque<SharedEvent>,
    window: AckWindow,
    negotiated: Option<Negotiated>,
    events_in: u64,
    events_out: u64,
    bytes_in: u64,
    bytes_out: u64,
}

impl<T> BbdoStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T, role: Role, codec: EventCodec, config: BbdoConfig) -> Self {
        let window = AckWindow::new(config.ack_limit);
        let assembler = FrameAssembler::new(!config.coarse, config.max_payload_size);
        Self {
            io,
            codec,
            config,
            role,
            peer: String::from("unknown"),
            state: StreamState::Init,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            assembler,
            write_buf: BytesMut::new(),
            inbound: VecDeque::new(),
            in_flight: VecDeque::new(),
            window,
            negotiated: None,
            events_in: 0,
            events_out: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn config(&self) -> &BbdoConfig {
        &self.config
    }

    /// Handshake outcome; `None` before it, or when negotiation is off.
    #[must_use]
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    #[must_use]
    pub fn window(&self) -> &AckWindow {
        &self.window
    }

    /// Take back the written events the peer never acknowledged, oldest
    /// first. Used to replay them over a new connection after this one
    /// failed.
    pub fn take_in_flight(&mut self) -> Vec<SharedEvent> {
        self.in_flight.drain(..).collect()
    }

    /// The substream this stream is layered over.
    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    fn local_handshake(&self) -> Handshake {
        Handshake {
            version: PROTOCOL_VERSION,
            extensions: self.config.extensions.clone(),
            ack_limit: self.config.ack_limit,
        }
    }

    /// Run the handshake if it has not happened yet.
    pub async fn negotiate(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Init => {}
            StreamState::Established => return Ok(()),
            StreamState::Negotiating => {
                let err =
                    StreamError::NegotiationFailed("an earlier handshake was interrupted".into());
                return Err(self.fail(err).await);
            }
            StreamState::Closed => return Err(StreamError::Closed),
        }
        if !self.config.negotiate {
            self.state = StreamState::Established;
            debug!(peer = %self.peer, ack_limit = self.window.limit(), "BBDO stream established without negotiation");
            return Ok(());
        }

        self.state = StreamState::Negotiating;
        let deadline = Instant::now() + self.config.timeout;
        let local = self.local_handshake();
        match self.handshake(&local, deadline).await {
            Ok(negotiated) => {
                self.window.set_limit(negotiated.ack_limit);
                info!(
                    peer = %self.peer,
                    peer_version = %negotiated.peer_version,
                    ack_limit = negotiated.ack_limit,
                    extensions = ?negotiated.extension_names().collect::<Vec<_>>(),
                    "BBDO negotiation succeeded"
                );
                self.negotiated = Some(negotiated);
                self.state = StreamState::Established;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn handshake(
        &mut self,
        local: &Handshake,
        deadline: Instant,
    ) -> Result<Negotiated, StreamError> {
        if self.role == Role::Client {
            self.send_control(local.to_event()?).await?;
        }
        let peer = self.read_handshake(deadline).await?;
        if self.role == Role::Server {
            self.send_control(local.to_event()?).await?;
        }
        negotiate(local, &peer)
    }

    async fn read_handshake(&mut self, deadline: Instant) -> Result<Handshake, StreamError> {
        match self.next_frame(Some(deadline)).await? {
            Frame::Event(event) => match event.downcast_ref::<VersionResponse>() {
                Some(response) => Handshake::from_event(response),
                None => Err(StreamError::NegotiationFailed(format!(
                    "expected version_response, peer sent {}",
                    event.type_code()
                ))),
            },
            Frame::Timeout => Err(StreamError::NegotiationFailed(format!(
                "no handshake from peer within {:?}",
                self.config.timeout
            ))),
            Frame::Eof => Err(StreamError::NegotiationFailed(
                "peer closed the connection during the handshake".into(),
            )),
        }
    }

    async fn ensure_established(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Established => Ok(()),
            StreamState::Closed => Err(StreamError::Closed),
            StreamState::Init | StreamState::Negotiating => self.negotiate().await,
        }
    }

    /// Pull the next frame chain, reading the substream as needed.
    async fn next_frame(&mut self, deadline: Option<Instant>) -> Result<Frame, StreamError> {
        loop {
            match self.assembler.feed(&mut self.read_buf)? {
                ParseResult::Complete { frame, consumed } => {
                    self.bytes_in += consumed as u64;
                    let header = frame.header;
                    let event = self
                        .codec
                        .decode(header.type_code, &frame.payload)?
                        .with_route(header.source_id, header.destination_id);
                    trace!(peer = %self.peer, type_code = %header.type_code, bytes = consumed, "Frame received");
                    return Ok(Frame::Event(event));
                }
                ParseResult::Incomplete { needed } => {
                    self.flush_acks().await;
                    let missing = needed.saturating_sub(self.read_buf.len());
                    self.read_buf.reserve(missing.max(READ_CHUNK));
                    let read = self.io.read_buf(&mut self.read_buf);
                    let n = match deadline {
                        Some(deadline) => match timeout_at(deadline, read).await {
                            Ok(result) => result?,
                            Err(_) => return Ok(Frame::Timeout),
                        },
                        None => read.await?,
                    };
                    if n == 0 {
                        if self.read_buf.is_empty() && !self.assembler.in_progress() {
                            return Ok(Frame::Eof);
                        }
                        return Err(StreamError::TruncatedPayload {
                            needed,
                            available: self.read_buf.len(),
                        });
                    }
                }
            }
        }
    }

    fn handle_control(&mut self, event: &Event) {
        if let Some(ack) = event.downcast_ref::<Ack>() {
            self.window.acknowledge(ack.acknowledged_events);
            let settled = usize::try_from(ack.acknowledged_events)
                .unwrap_or(usize::MAX)
                .min(self.in_flight.len());
            self.in_flight.drain(..settled);
            trace!(
                peer = %self.peer,
                acknowledged = ack.acknowledged_events,
                outstanding = self.window.outstanding(),
                "Ack received"
            );
        } else if event.downcast_ref::<Ping>().is_some() {
            trace!(peer = %self.peer, "Ping received");
        } else {
            debug!(peer = %self.peer, type_code = %event.type_code(), "Ignoring control event after handshake");
        }
    }

    /// Account for a consumed user event, acknowledging when a window is due.
    async fn note_received(&mut self) -> Result<(), StreamError> {
        self.events_in += 1;
        if let Some(count) = self.window.record_received() {
            self.send_control(Ack {
                acknowledged_events: count,
            })
            .await?;
        }
        Ok(())
    }

    /// Acknowledge whatever was consumed before waiting on the substream.
    ///
    /// A failed ack is left for the following read to surface.
    async fn flush_acks(&mut self) {
        if self.state != StreamState::Established {
            return;
        }
        if let Some(count) = self.window.take_unacknowledged() {
            match self
                .send_control(Ack {
                    acknowledged_events: count,
                })
                .await
            {
                Ok(_) => trace!(peer = %self.peer, acknowledged = count, "Pending events acknowledged"),
                Err(e) => debug!(peer = %self.peer, error = %e, "Ack not delivered"),
            }
        }
    }

    /// Route a user event that arrived outside of `read`.
    async fn stash_inbound(&mut self, event: Event) -> Result<(), StreamError> {
        if !self.config.direction.can_read() {
            debug!(peer = %self.peer, type_code = %event.type_code(), "Discarding event on output-only stream");
            return Ok(());
        }
        self.note_received().await?;
        self.inbound.push_back(Arc::new(event));
        Ok(())
    }

    async fn next_user_event(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome, StreamError> {
        loop {
            match self.next_frame(deadline).await? {
                Frame::Event(event) if event.is_internal() => self.handle_control(&event),
                Frame::Event(event) => {
                    self.note_received().await?;
                    return Ok(ReadOutcome::Event(Arc::new(event)));
                }
                Frame::Timeout => return Ok(ReadOutcome::Timeout),
                Frame::Eof => {
                    debug!(peer = %self.peer, "Peer closed the BBDO stream");
                    self.shutdown_io().await;
                    return Ok(ReadOutcome::Closed);
                }
            }
        }
    }

    /// Drain frames already available without waiting.
    async fn poll_pending(&mut self) -> Result<(), StreamError> {
        while self.window.is_full() {
            match self.next_frame(Some(Instant::now())).await? {
                Frame::Event(event) if event.is_internal() => self.handle_control(&event),
                Frame::Event(event) => self.stash_inbound(event).await?,
                Frame::Timeout => break,
                Frame::Eof => {
                    self.shutdown_io().await;
                    return Err(StreamError::Closed);
                }
            }
        }
        Ok(())
    }

    /// Block until an ack frees the window; `false` on deadline.
    async fn wait_for_ack(&mut self, deadline: Option<Instant>) -> Result<bool, StreamError> {
        while self.window.is_full() {
            match self.next_frame(deadline).await? {
                Frame::Event(event) if event.is_internal() => self.handle_control(&event),
                Frame::Event(event) => self.stash_inbound(event).await?,
                Frame::Timeout => return Ok(false),
                Frame::Eof => {
                    self.shutdown_io().await;
                    return Err(StreamError::Closed);
                }
            }
        }
        Ok(true)
    }

    async fn send_event(&mut self, event: &Event) -> Result<usize, StreamError> {
        let payload = self.codec.encode(event)?;
        self.write_buf.clear();
        frame::write_frames(
            &mut self.write_buf,
            event.type_code(),
            event.source_id(),
            event.destination_id(),
            &payload,
        );
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        let written = self.write_buf.len();
        self.bytes_out += written as u64;
        trace!(peer = %self.peer, type_code = %event.type_code(), bytes = written, "Frame sent");
        Ok(written)
    }

    async fn send_control<E: MappedEvent>(&mut self, data: E) -> Result<usize, StreamError> {
        self.send_event(&Event::new(data)).await
    }

    async fn shutdown_io(&mut self) {
        self.state = StreamState::Closed;
        if let Err(e) = self.io.shutdown().await {
            trace!(peer = %self.peer, error = %e, "Substream shutdown failed");
        }
    }

    /// Close after a fatal error and hand the error back for surfacing.
    async fn fail(&mut self, err: StreamError) -> StreamError {
        warn!(peer = %self.peer, state = %self.state, error = %err, "Closing BBDO stream after error");
        self.shutdown_io().await;
        err
    }

    /// Like [`Stream::write`], but waits for acks while the window is full.
    ///
    /// Returns [`WriteOutcome::WindowFull`] only if `deadline` passes first.
    pub async fn write_wait(
        &mut self,
        event: SharedEvent,
        deadline: Option<Instant>,
    ) -> Result<WriteOutcome, StreamError> {
        loop {
            if let WriteOutcome::Accepted(n) = self.write(Arc::clone(&event)).await? {
                return Ok(WriteOutcome::Accepted(n));
            }
            match self.wait_for_ack(deadline).await {
                Ok(true) => continue,
                Ok(false) => return Ok(WriteOutcome::WindowFull),
                Err(StreamError::Closed) => return Err(StreamError::Closed),
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Send a keep-alive control frame.
    pub async fn ping(&mut self) -> Result<(), StreamError> {
        self.ensure_established().await?;
        match self.send_control(Ping::default()).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }
}

#[async_trait]
impl<T> Stream for BbdoStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome, StreamError> {
        if self.state == StreamState::Closed {
            return Ok(ReadOutcome::Closed);
        }
        if !self.config.direction.can_read() {
            return Err(StreamError::Unsupported("read on an output-only BBDO stream"));
        }
        self.ensure_established().await?;
        if let Some(event) = self.inbound.pop_front() {
            return Ok(ReadOutcome::Event(event));
        }
        match self.next_user_event(deadline).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn write(&mut self, event: SharedEvent) -> Result<WriteOutcome, StreamError> {
        if self.state == StreamState::Closed {
            return Err(StreamError::Closed);
        }
        if !self.config.direction.can_write() {
            return Err(StreamError::Unsupported("write on an input-only BBDO stream"));
        }
        self.ensure_established().await?;

        if event.is_internal() {
            return match self.send_event(&event).await {
                Ok(n) => Ok(WriteOutcome::Accepted(n)),
                Err(e) => Err(self.fail(e).await),
            };
        }

        if self.window.is_full() {
            match self.poll_pending().await {
                Ok(()) => {}
                Err(StreamError::Closed) => return Err(StreamError::Closed),
                Err(e) => return Err(self.fail(e).await),
            }
            if self.window.is_full() {
                trace!(peer = %self.peer, outstanding = self.window.outstanding(), "Ack window full");
                return Ok(WriteOutcome::WindowFull);
            }
        }

        match self.send_event(&event).await {
            Ok(n) => {
                self.window.record_sent();
                self.in_flight.push_back(event);
                self.events_out += 1;
                Ok(WriteOutcome::Accepted(n))
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        if self.state == StreamState::Established {
            if let Some(count) = self.window.take_unacknowledged() {
                if let Err(e) = self
                    .send_control(Ack {
                        acknowledged_events: count,
                    })
                    .await
                {
                    debug!(peer = %self.peer, error = %e, "Final ack not delivered");
                }
            }
        }
        self.shutdown_io().await;
        info!(
            peer = %self.peer,
            events_in = self.events_in,
            events_out = self.events_out,
            "BBDO stream closed"
        );
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        let mut stats = StreamStats::new();
        stats.insert("kind".into(), "bbdo".into());
        stats.insert("peer".into(), self.peer.clone());
        stats.insert("state".into(), self.state.to_string());
        stats.insert("coarse".into(), self.config.coarse.to_string());
        stats.insert("ack_limit".into(), self.window.limit().to_string());
        stats.insert("unacknowledged".into(), self.window.outstanding().to_string());
        stats.insert(
            "received_since_ack".into(),
            self.window.received_since_ack().to_string(),
        );
        stats.insert("pending_inbound".into(), self.inbound.len().to_string());
        stats.insert("in_flight".into(), self.in_flight.len().to_string());
        stats.insert("events_in".into(), self.events_in.to_string());
        stats.insert("events_out".into(), self.events_out.to_string());
        stats.insert("bytes_in".into(), self.bytes_in.to_string());
        stats.insert("bytes_out".into(), self.bytes_out.to_string());
        let negotiation = match (&self.negotiated, self.config.negotiate) {
            (Some(_), _) => "done",
            (None, false) => "disabled",
            (None, true) => "pending",
        };
        stats.insert("negotiation".into(), negotiation.into());
        if let Some(negotiated) = &self.negotiated {
            stats.insert(
                "extensions".into(),
                negotiated.extension_names().collect::<Vec<_>>().join(","),
            );
            stats.insert("peer_version".into(), negotiated.peer_version.to_string());
        }
        stats
    }
}

impl<T> fmt::Debug for BbdoStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BbdoStream")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
