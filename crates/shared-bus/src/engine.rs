//! # Multiplexing Engine
//!
//! The process-wide bus. One [`Engine`] value is created at startup and
//! cloned into every endpoint that publishes or subscribes.
//!
//! ```text
//!  Publisher ─┐                       ┌─▶ queue ─▶ Subscriber
//!  Publisher ─┼─▶ publish() ─fan-out──┼─▶ queue ─▶ Subscriber
//!  Subscriber─┘   (one at a time)     └─▶ queue ─▶ Subscriber
//! ```
//!
//! ## Lifecycle
//!
//! `New → Running → Stopped`, and `Stopped → Running` again on restart.
//! Events published while `New` wait in a bounded backlog that
//! [`Engine::start`] flushes in order; once it is full, publishing fails with
//! [`PublishError::BacklogFull`] and the caller keeps the event. Events
//! published while `Stopped` are discarded and counted.
//!
//! ## Locking
//!
//! The fan-out mutex serializes broadcasts and lifecycle changes. The
//! subscriber list is a copy-on-write snapshot behind an `RwLock`, so a
//! broadcast sees a subscriber either entirely or not at all. Order of
//! acquisition is always fan-out, then registry, then queue.

use crate::filter::EventFilter;
use crate::publisher::Publisher;
use crate::queue::{PushOutcome, QueueStats, SubscriberId, SubscriberQueue};
use crate::spill::{MemorySpill, SpillStore, DEFAULT_SPILL_CAPACITY};
use crate::subscriber::Subscriber;
use parking_lot::{Mutex, RwLock};
use shared_types::{SharedEvent, StreamError, StreamStats};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Default bound on a subscriber's live queue.
pub const DEFAULT_QUEUE_MAX_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// Some subscribers could not take the event; the others did.
    #[error("spill exhausted for {subscribers:?} ({delivered} deliveries succeeded)")]
    SpillExhausted {
        delivered: usize,
        subscribers: Vec<String>,
    },

    /// The engine has not started and its backlog is at capacity; the event
    /// was not taken.
    #[error("pre-start backlog full ({capacity} events)")]
    BacklogFull { capacity: usize },
}

impl From<PublishError> for StreamError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::SpillExhausted {
                delivered,
                subscribers,
            } => Self::SpillExhausted {
                delivered,
                subscribers,
            },
            PublishError::BacklogFull { capacity } => Self::BacklogFull { capacity },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("queue_max_size must be at least 1")]
    ZeroQueueSize,

    #[error("backlog_capacity must be at least 1")]
    ZeroBacklog,

    #[error("subscriber name must not be empty")]
    EmptySubscriberName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    New,
    Running,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Engine-wide defaults; subscribers may override the queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub queue_max_size: usize,
    pub spill_capacity: usize,
    /// Bound on events held before `start()`.
    pub backlog_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_max_size: DEFAULT_QUEUE_MAX_SIZE,
            spill_capacity: DEFAULT_SPILL_CAPACITY,
            backlog_capacity: DEFAULT_SPILL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.queue_max_size == 0 {
            return Err(EngineError::ZeroQueueSize);
        }
        if self.backlog_capacity == 0 {
            return Err(EngineError::ZeroBacklog);
        }
        Ok(())
    }
}

/// What a new subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    pub name: String,
    pub filter: EventFilter,
    /// Overrides [`EngineConfig::queue_max_size`].
    pub queue_max_size: Option<usize>,
    /// Overrides [`EngineConfig::spill_capacity`].
    pub spill_capacity: Option<usize>,
}

impl SubscriberConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: EventFilter::All,
            queue_max_size: None,
            spill_capacity: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_queue_max_size(mut self, size: usize) -> Self {
        self.queue_max_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_spill_capacity(mut self, capacity: usize) -> Self {
        self.spill_capacity = Some(capacity);
        self
    }
}

/// Counters reported by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub state: EngineState,
    pub subscribers: usize,
    pub published: u64,
    pub deliveries: u64,
    pub discarded: u64,
    pub backlog: usize,
}

impl EngineStats {
    #[must_use]
    pub fn to_map(&self) -> StreamStats {
        let mut map = StreamStats::new();
        map.insert("engine_state".into(), self.state.to_string());
        map.insert("subscribers".into(), self.subscribers.to_string());
        map.insert("published".into(), self.published.to_string());
        map.insert("deliveries".into(), self.deliveries.to_string());
        map.insert("discarded".into(), self.discarded.to_string());
        map.insert("backlog".into(), self.backlog.to_string());
        map
    }
}

struct FanOut {
    state: EngineState,
    backlog: VecDeque<SharedEvent>,
}

struct EngineInner {
    config: EngineConfig,
    fan_out: Mutex<FanOut>,
    registry: RwLock<Arc<Vec<Arc<SubscriberQueue>>>>,
    published: AtomicU64,
    deliveries: AtomicU64,
    discarded: AtomicU64,
}

/// Cloneable handle to the bus.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                fan_out: Mutex::new(FanOut {
                    state: EngineState::New,
                    backlog: VecDeque::new(),
                }),
                registry: RwLock::new(Arc::new(Vec::new())),
                published: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.fan_out.lock().state
    }

    /// Begin broadcasting, flushing any backlog first. Returns the number of
    /// backlog events flushed.
    pub fn start(&self) -> usize {
        let mut fan_out = self.inner.fan_out.lock();
        if fan_out.state == EngineState::Running {
            return 0;
        }
        fan_out.state = EngineState::Running;
        let backlog = std::mem::take(&mut fan_out.backlog);
        let flushed = backlog.len();
        let snapshot = self.snapshot();
        for event in backlog {
            if let Err(e) = self.broadcast(&snapshot, event) {
                warn!(error = %e, "Backlog event only partially delivered");
            }
        }
        info!(flushed, subscribers = snapshot.len(), "Engine started");
        flushed
    }

    /// Stop broadcasting. Subscribers are detached but may drain what they
    /// already hold; later publishes are discarded.
    pub fn stop(&self) {
        let mut fan_out = self.inner.fan_out.lock();
        if fan_out.state == EngineState::Stopped {
            return;
        }
        fan_out.state = EngineState::Stopped;
        let dropped_backlog = fan_out.backlog.len();
        if dropped_backlog > 0 {
            fan_out.backlog.clear();
            self.inner
                .discarded
                .fetch_add(dropped_backlog as u64, Ordering::Relaxed);
        }
        let detached = std::mem::take(&mut *self.inner.registry.write());
        for queue in detached.iter() {
            queue.drain();
        }
        info!(
            detached = detached.len(),
            dropped_backlog,
            "Engine stopped, subscribers draining"
        );
    }

    /// Hand `event` to every matching subscriber.
    ///
    /// Never blocks on queue capacity. Returns the number of subscribers the
    /// event reached; 0 while stopped, or while new (the event is then
    /// backlogged). A full backlog refuses the event with
    /// [`PublishError::BacklogFull`].
    pub fn publish(&self, event: SharedEvent) -> Result<usize, PublishError> {
        let mut fan_out = self.inner.fan_out.lock();
        match fan_out.state {
            EngineState::Running => {}
            EngineState::New => {
                let capacity = self.inner.config.backlog_capacity;
                if fan_out.backlog.len() >= capacity {
                    debug!(type_code = %event.type_code(), capacity, "Pre-start backlog full");
                    return Err(PublishError::BacklogFull { capacity });
                }
                self.inner.published.fetch_add(1, Ordering::Relaxed);
                fan_out.backlog.push_back(event);
                return Ok(0);
            }
            EngineState::Stopped => {
                self.inner.discarded.fetch_add(1, Ordering::Relaxed);
                trace!(type_code = %event.type_code(), "Engine stopped, event discarded");
                return Ok(0);
            }
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.snapshot();
        self.broadcast(&snapshot, event)
    }

    fn snapshot(&self) -> Arc<Vec<Arc<SubscriberQueue>>> {
        Arc::clone(&self.inner.registry.read())
    }

    /// Caller holds the fan-out lock.
    fn broadcast(
        &self,
        snapshot: &[Arc<SubscriberQueue>],
        event: SharedEvent,
    ) -> Result<usize, PublishError> {
        let code = event.type_code();
        let mut delivered = 0;
        let mut exhausted = Vec::new();
        for queue in snapshot.iter().filter(|q| q.filter().matches(code)) {
            match queue.push(Arc::clone(&event)) {
                PushOutcome::Queued | PushOutcome::Spilled => delivered += 1,
                PushOutcome::Rejected => exhausted.push(queue.name().to_string()),
                PushOutcome::Detached => {}
            }
        }
        self.inner
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        trace!(type_code = %code, delivered, "Event broadcast");
        if exhausted.is_empty() {
            Ok(delivered)
        } else {
            Err(PublishError::SpillExhausted {
                delivered,
                subscribers: exhausted,
            })
        }
    }

    /// Register a subscriber with an in-memory spill.
    pub fn subscribe(&self, config: SubscriberConfig) -> Result<Subscriber, EngineError> {
        let capacity = config
            .spill_capacity
            .unwrap_or(self.inner.config.spill_capacity);
        self.subscribe_with_spill(config, Box::new(MemorySpill::new(capacity)))
    }

    /// Register a subscriber backed by a caller-provided spill store.
    pub fn subscribe_with_spill(
        &self,
        config: SubscriberConfig,
        spill: Box<dyn SpillStore>,
    ) -> Result<Subscriber, EngineError> {
        if config.name.trim().is_empty() {
            return Err(EngineError::EmptySubscriberName);
        }
        let max_size = config
            .queue_max_size
            .unwrap_or(self.inner.config.queue_max_size);
        if max_size == 0 {
            return Err(EngineError::ZeroQueueSize);
        }
        let queue = Arc::new(SubscriberQueue::new(
            config.name,
            config.filter,
            max_size,
            spill,
        ));
        {
            let mut registry = self.inner.registry.write();
            let mut next = Vec::with_capacity(registry.len() + 1);
            next.extend(registry.iter().cloned());
            next.push(Arc::clone(&queue));
            *registry = Arc::new(next);
        }
        debug!(
            subscriber = %queue.name(),
            id = %queue.id(),
            filter = %queue.filter(),
            max_size,
            "Subscriber registered"
        );
        Ok(Subscriber::new(self.clone(), queue))
    }

    /// Remove a subscriber and close its queue. What it still holds is lost
    /// unless its spill store persists it.
    ///
    /// Returns false if the id is not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write();
            let Some(position) = registry.iter().position(|q| q.id() == id) else {
                return false;
            };
            let mut next: Vec<_> = registry.iter().cloned().collect();
            let removed = next.remove(position);
            *registry = Arc::new(next);
            removed
        };
        let dropped = removed.close();
        if dropped > 0 {
            warn!(subscriber = %removed.name(), dropped, "Subscriber removed with undelivered events");
        } else {
            debug!(subscriber = %removed.name(), "Subscriber removed");
        }
        true
    }

    /// A publishing endpoint named `name`.
    pub fn publisher(&self, name: impl Into<String>) -> Publisher {
        Publisher::new(self.clone(), name)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Per-subscriber queue statistics, by name.
    #[must_use]
    pub fn queue_stats(&self) -> Vec<(String, QueueStats)> {
        self.snapshot()
            .iter()
            .map(|q| (q.name().to_string(), q.stats()))
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let (state, backlog) = {
            let fan_out = self.inner.fan_out.lock();
            (fan_out.state, fan_out.backlog.len())
        };
        EngineStats {
            state,
            subscribers: self.subscriber_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            deliveries: self.inner.deliveries.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            backlog,
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
