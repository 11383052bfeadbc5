//! # Broker Runtime
//!
//! Owns the engine and one task per configured endpoint.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration against the event registry
//! 2. Subscribe `connect` outputs, bind every listener
//! 3. Start the engine
//! 4. Spawn input tasks
//!
//! Outputs are attached before the engine starts so they see every event.
//!
//! ## Shutdown Sequence
//!
//! 1. Signal shutdown to all tasks
//! 2. Stop the engine: subscribers drain, then read `Closed`
//! 3. Wait for tasks (bounded by a grace period), abort stragglers

use crate::config::{BrokerConfig, ConfigError, EndpointConfig, EndpointMode};
use crate::endpoint::{AnyDialer, AnyListener, EndpointStream};
use crate::pump::{pump, PumpExit, PumpOptions};
use mb_01_event_codec::EventCodec;
use mb_02_bbdo::{BbdoAcceptor, BbdoConnector, Direction};
use shared_bus::{
    Engine, EngineError, EventFilter, FileSpill, SpillFileError, Subscriber, SubscriberConfig,
};
use shared_types::{Connector, EventRegistry, SharedEvent, Stream, StreamStats};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use broker_telemetry::endpoint_span;
use tracing::{debug, error, info, warn, Instrument};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("endpoint '{endpoint}': cannot listen on {address}: {source}")]
    Bind {
        endpoint: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("endpoint '{endpoint}': unusable address {address}: {source}")]
    Address {
        endpoint: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("endpoint '{endpoint}': {source}")]
    Spill {
        endpoint: String,
        #[source]
        source: SpillFileError,
    },

    #[error("runtime already started")]
    AlreadyStarted,
}

/// The running broker.
pub struct BrokerRuntime {
    config: BrokerConfig,
    registry: Arc<EventRegistry>,
    codec: EventCodec,
    engine: Engine,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: JoinSet<()>,
    listen_addrs: BTreeMap<String, SocketAddr>,
    started: bool,
}

impl BrokerRuntime {
    pub fn new(config: BrokerConfig) -> Result<Self, RuntimeError> {
        let registry = Arc::new(EventRegistry::builtin());
        config.validate(&registry)?;
        let engine = Engine::new(config.engine.to_engine_config())?;
        let codec = EventCodec::new(Arc::clone(&registry));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            inputs = config.inputs.len(),
            outputs = config.outputs.len(),
            event_types = registry.len(),
            "Broker runtime created"
        );
        Ok(Self {
            config,
            registry,
            codec,
            engine,
            shutdown_tx,
            shutdown_rx,
            tasks: JoinSet::new(),
            listen_addrs: BTreeMap::new(),
            started: false,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Address a `listen` endpoint is bound to (TCP only).
    #[must_use]
    pub fn local_addr(&self, endpoint: &str) -> Option<SocketAddr> {
        self.listen_addrs.get(endpoint).copied()
    }

    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }
        self.started = true;

        for endpoint in self.config.outputs.clone() {
            match endpoint.mode {
                EndpointMode::Connect => self.spawn_connect_output(endpoint)?,
                EndpointMode::Listen => self.spawn_listen_output(endpoint).await?,
            }
        }

        let flushed = self.engine.start();
        debug!(flushed, "Engine backlog flushed");

        for endpoint in self.config.inputs.clone() {
            match endpoint.mode {
                EndpointMode::Connect => self.spawn_connect_input(endpoint)?,
                EndpointMode::Listen => self.spawn_listen_input(endpoint).await?,
            }
        }
        info!(tasks = self.tasks.len(), "Broker runtime started");
        Ok(())
    }

    /// Stop everything, waiting at most `grace` for outputs to drain.
    pub async fn shutdown(&mut self, grace: Duration) {
        info!("Initiating graceful shutdown...");
        if self.shutdown_tx.send(true).is_err() {
            debug!("No task is listening for shutdown");
        }
        self.engine.stop();

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "Endpoint task panicked");
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Grace period elapsed, aborting endpoint tasks");
            self.tasks.shutdown().await;
        }
        info!(stats = ?self.engine.stats(), "Shutdown complete");
    }

    /// Engine counters plus one group of entries per subscriber queue.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        let mut stats = self.engine.stats().to_map();
        stats.insert("event_types".into(), self.registry.len().to_string());
        for (name, queue) in self.engine.queue_stats() {
            stats.insert(format!("queue.{name}.depth"), queue.live.to_string());
            stats.insert(format!("queue.{name}.spilled"), queue.spilled_now.to_string());
            stats.insert(format!("queue.{name}.delivered"), queue.delivered.to_string());
        }
        stats
    }

    fn connector(
        &self,
        endpoint: &EndpointConfig,
        direction: Direction,
    ) -> Result<BbdoConnector<AnyDialer>, RuntimeError> {
        let dialer = AnyDialer::for_endpoint(endpoint).map_err(|source| RuntimeError::Address {
            endpoint: endpoint.name.clone(),
            address: endpoint.address.clone(),
            source,
        })?;
        BbdoConnector::new(dialer, self.codec.clone(), endpoint.bbdo_config(direction)).map_err(
            |source| {
                RuntimeError::from(ConfigError::Bbdo {
                    endpoint: endpoint.name.clone(),
                    source,
                })
            },
        )
    }

    async fn acceptor(
        &mut self,
        endpoint: &EndpointConfig,
        direction: Direction,
    ) -> Result<BbdoAcceptor<AnyListener>, RuntimeError> {
        let listener = AnyListener::bind(endpoint).await.map_err(|source| RuntimeError::Bind {
            endpoint: endpoint.name.clone(),
            address: endpoint.address.clone(),
            source,
        })?;
        if let Some(addr) = listener.local_addr() {
            self.listen_addrs.insert(endpoint.name.clone(), addr);
        }
        info!(endpoint = %endpoint.name, address = %endpoint.address, "Listening");
        BbdoAcceptor::new(listener, self.codec.clone(), endpoint.bbdo_config(direction)).map_err(
            |source| {
                RuntimeError::from(ConfigError::Bbdo {
                    endpoint: endpoint.name.clone(),
                    source,
                })
            },
        )
    }

    fn subscriber_config(
        &self,
        endpoint: &EndpointConfig,
        name: String,
    ) -> Result<SubscriberConfig, RuntimeError> {
        let mut config =
            SubscriberConfig::new(name).with_filter(endpoint.event_filter(&self.registry)?);
        config.queue_max_size = endpoint.queue_max_size;
        config.spill_capacity = endpoint.spill_capacity;
        Ok(config)
    }

    /// Subscribe a `connect` output, on disk when a spill directory is set.
    fn output_subscriber(&self, endpoint: &EndpointConfig) -> Result<Subscriber, RuntimeError> {
        let config = self.subscriber_config(endpoint, endpoint.name.clone())?;
        let Some(dir) = &self.config.engine.spill_dir else {
            return Ok(self.engine.subscribe(config)?);
        };
        let capacity = config
            .spill_capacity
            .unwrap_or(self.config.engine.spill_capacity);
        let path = dir.join(format!("{}.spill", endpoint.name));
        let spill = FileSpill::open(path, self.codec.clone(), capacity).map_err(|source| {
            RuntimeError::Spill {
                endpoint: endpoint.name.clone(),
                source,
            }
        })?;
        Ok(self.engine.subscribe_with_spill(config, Box::new(spill))?)
    }

    fn spawn_connect_output(&mut self, endpoint: EndpointConfig) -> Result<(), RuntimeError> {
        let connector = self.connector(&endpoint, Direction::Output)?;
        let subscriber = self.output_subscriber(&endpoint)?;
        let span = endpoint_span!(endpoint.name, mode = "connect", direction = "output");
        let shutdown = self.shutdown_rx.clone();
        self.tasks.spawn(
            run_connect(
                endpoint,
                connector,
                subscriber.into(),
                Flow::Output,
                shutdown,
            )
            .instrument(span),
        );
        Ok(())
    }

    fn spawn_connect_input(&mut self, endpoint: EndpointConfig) -> Result<(), RuntimeError> {
        let connector = self.connector(&endpoint, Direction::Input)?;
        let publisher = self
            .engine
            .publisher(endpoint.name.clone())
            .with_filter(endpoint.event_filter(&self.registry)?);
        let span = endpoint_span!(endpoint.name, mode = "connect", direction = "input");
        let shutdown = self.shutdown_rx.clone();
        self.tasks.spawn(
            run_connect(
                endpoint,
                connector,
                publisher.into(),
                Flow::Input,
                shutdown,
            )
            .instrument(span),
        );
        Ok(())
    }

    async fn spawn_listen_output(&mut self, endpoint: EndpointConfig) -> Result<(), RuntimeError> {
        let acceptor = self.acceptor(&endpoint, Direction::Output).await?;
        let template = self.subscriber_config(&endpoint, endpoint.name.clone())?;
        let attach = Attach::Output {
            engine: self.engine.clone(),
            template,
        };
        let span = endpoint_span!(endpoint.name, mode = "listen", direction = "output");
        self.tasks.spawn(
            run_listen(endpoint.name, acceptor, attach, self.shutdown_rx.clone()).instrument(span),
        );
        Ok(())
    }

    async fn spawn_listen_input(&mut self, endpoint: EndpointConfig) -> Result<(), RuntimeError> {
        let acceptor = self.acceptor(&endpoint, Direction::Input).await?;
        let attach = Attach::Input {
            engine: self.engine.clone(),
            filter: endpoint.event_filter(&self.registry)?,
        };
        let span = endpoint_span!(endpoint.name, mode = "listen", direction = "input");
        self.tasks.spawn(
            run_listen(endpoint.name, acceptor, attach, self.shutdown_rx.clone()).instrument(span),
        );
        Ok(())
    }
}

/// Which way a connection's events flow relative to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Peer to bus.
    Input,
    /// Bus to peer.
    Output,
}

impl Flow {
    fn options(self) -> PumpOptions {
        PumpOptions {
            drain_on_shutdown: self == Self::Output,
            ..PumpOptions::default()
        }
    }
}

/// How an accepted connection is attached to the bus.
enum Attach {
    Input { engine: Engine, filter: EventFilter },
    Output { engine: Engine, template: SubscriberConfig },
}

impl Attach {
    fn flow(&self) -> Flow {
        match self {
            Self::Input { .. } => Flow::Input,
            Self::Output { .. } => Flow::Output,
        }
    }

    fn bus_stream(&self, name: String) -> Result<EndpointStream, EngineError> {
        match self {
            Self::Input { engine, filter } => {
                Ok(engine.publisher(name).with_filter(filter.clone()).into())
            }
            Self::Output { engine, template } => {
                let config = SubscriberConfig {
                    name,
                    ..template.clone()
                };
                Ok(engine.subscribe(config)?.into())
            }
        }
    }
}

/// True when shutdown was signalled before `delay` elapsed.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

async fn close_quietly(name: &str, stream: &mut EndpointStream) {
    if let Err(e) = stream.close().await {
        debug!(endpoint = %name, kind = stream.kind(), error = %e, "Close failed");
    }
}

/// Run one peer connection against a bus stream, writing `carry` first.
async fn forward(
    name: &str,
    peer: &mut EndpointStream,
    bus: &mut EndpointStream,
    carry: &mut VecDeque<SharedEvent>,
    flow: Flow,
    shutdown: &watch::Receiver<bool>,
) -> Result<PumpExit, shared_types::StreamError> {
    let report = match flow {
        Flow::Input => pump(name, peer, bus, carry, shutdown, flow.options()).await?,
        Flow::Output => pump(name, bus, peer, carry, shutdown, flow.options()).await?,
    };
    info!(
        endpoint = %name,
        forwarded = report.forwarded,
        partial = report.partial,
        exit = ?report.exit,
        "Connection finished"
    );
    Ok(report.exit)
}

/// Keep a `connect` endpoint connected until shutdown, retrying on failure.
///
/// Events the failed connection never got acknowledged, and the event the
/// pump held when it failed, are written first on the next connection.
async fn run_connect(
    endpoint: EndpointConfig,
    connector: BbdoConnector<AnyDialer>,
    mut bus: EndpointStream,
    flow: Flow,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = endpoint.name.as_str();
    let mut carry = VecDeque::new();
    loop {
        let opened = tokio::select! {
            opened = connector.open() => opened,
            _ = shutdown.changed() => break,
        };
        match opened {
            Ok(stream) => {
                let mut peer = EndpointStream::from(stream);
                let result = forward(name, &mut peer, &mut bus, &mut carry, flow, &shutdown).await;
                if result.is_err() {
                    let mut replay: VecDeque<_> = peer.take_in_flight().into();
                    if !replay.is_empty() {
                        debug!(endpoint = %name, unacknowledged = replay.len(), "Keeping unacknowledged events for replay");
                    }
                    replay.append(&mut carry);
                    carry = replay;
                }
                close_quietly(name, &mut peer).await;
                match result {
                    Ok(PumpExit::Shutdown) => break,
                    // A drained output is done for good.
                    Ok(PumpExit::SourceClosed) if flow == Flow::Output => break,
                    Ok(PumpExit::SourceClosed) => {
                        info!(endpoint = %name, "Peer closed the connection");
                    }
                    Err(e) => {
                        warn!(endpoint = %name, error = %e, "Connection failed");
                    }
                }
            }
            Err(e) => {
                warn!(
                    endpoint = %name,
                    error = %e,
                    retry_in = ?endpoint.retry_interval(),
                    "Cannot open connection"
                );
            }
        }
        if sleep_or_shutdown(endpoint.retry_interval(), &mut shutdown).await {
            break;
        }
    }
    if !carry.is_empty() {
        warn!(endpoint = %name, dropped = carry.len(), "Undelivered events dropped at shutdown");
    }
    close_quietly(name, &mut bus).await;
    debug!(endpoint = %name, "Endpoint task finished");
}

/// Accept peers on a `listen` endpoint until shutdown.
async fn run_listen(
    name: String,
    mut acceptor: BbdoAcceptor<AnyListener>,
    attach: Attach,
    mut shutdown: watch::Receiver<bool>,
) {
    let flow = attach.flow();
    let mut connections = JoinSet::new();
    let mut accepted: u64 = 0;
    loop {
        let next = tokio::select! {
            next = acceptor.accept_pending() => next,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            _ = shutdown.changed() => break,
        };
        let stream = match next {
            Ok(stream) => stream,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "Accept failed");
                if sleep_or_shutdown(ACCEPT_BACKOFF, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };
        accepted += 1;
        let connection = format!("{name}#{accepted}");
        info!(endpoint = %name, connection = %connection, peer = %stream.peer(), "Peer connected");
        let mut bus = match attach.bus_stream(connection.clone()) {
            Ok(bus) => bus,
            Err(e) => {
                error!(endpoint = %name, error = %e, "Cannot attach connection to the bus");
                continue;
            }
        };
        let mut stream = stream;
        let watch = shutdown.clone();
        connections.spawn(async move {
            // Handshake here so an idle output still answers the peer.
            if let Err(e) = stream.negotiate().await {
                warn!(connection = %connection, error = %e, "Handshake failed");
                close_quietly(&connection, &mut bus).await;
                return;
            }
            let mut peer = EndpointStream::from(stream);
            let mut carry = VecDeque::new();
            if let Err(e) = forward(&connection, &mut peer, &mut bus, &mut carry, flow, &watch).await {
                warn!(connection = %connection, error = %e, "Connection failed");
            }
            close_quietly(&connection, &mut peer).await;
            close_quietly(&connection, &mut bus).await;
        });
    }
    while connections.join_next().await.is_some() {}
    debug!(endpoint = %name, accepted, "Listener finished");
}
