//! # Subscriber Stream
//!
//! The draining side of the bus. Each subscriber reads its own queue in
//! broadcast order; dropping it unsubscribes and closes its queue, which
//! leaves a persistent spill holding whatever was not read.

use crate::engine::Engine;
use crate::queue::{SubscriberId, SubscriberQueue};
use async_trait::async_trait;
use shared_types::{ReadOutcome, SharedEvent, Stream, StreamError, StreamStats, WriteOutcome};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct Subscriber {
    engine: Engine,
    queue: Arc<SubscriberQueue>,
    closed: bool,
}

impl Subscriber {
    pub(crate) fn new(engine: Engine, queue: Arc<SubscriberQueue>) -> Self {
        Self {
            engine,
            queue,
            closed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.queue.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Wait for the next queued event. Same as [`Stream::read`] without the
    /// `Result`, since a queue cannot fail.
    pub async fn recv(&mut self, deadline: Option<Instant>) -> ReadOutcome {
        if self.closed {
            return ReadOutcome::Closed;
        }
        self.queue.recv(deadline).await
    }

    /// Take a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<SharedEvent> {
        if self.closed {
            return None;
        }
        self.queue.try_pop()
    }

    /// Unsubscribe; once the engine has stopped the queue is already
    /// unregistered and only needs closing.
    fn detach(&mut self) {
        if !self.closed {
            self.closed = true;
            if !self.engine.unsubscribe(self.queue.id()) {
                let dropped = self.queue.close();
                if dropped > 0 {
                    debug!(subscriber = %self.name(), dropped, "Undelivered events discarded");
                }
            }
        }
    }
}

#[async_trait]
impl Stream for Subscriber {
    async fn read(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome, StreamError> {
        Ok(self.recv(deadline).await)
    }

    /// Events written to a subscriber go back onto the bus.
    async fn write(&mut self, event: SharedEvent) -> Result<WriteOutcome, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.engine.publish(event)?;
        Ok(WriteOutcome::Accepted(1))
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if !self.closed {
            debug!(subscriber = %self.name(), "Closing subscriber");
            self.detach();
        }
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        let queue = self.queue.stats();
        let mut stats = StreamStats::new();
        stats.insert("kind".into(), "subscriber".into());
        stats.insert("name".into(), self.name().to_string());
        stats.insert("filter".into(), self.queue.filter().to_string());
        stats.insert("queue_depth".into(), queue.live.to_string());
        stats.insert("queue_max_size".into(), queue.max_size.to_string());
        stats.insert("spill_depth".into(), queue.spilled_now.to_string());
        if let Some(capacity) = queue.spill_capacity {
            stats.insert("spill_capacity".into(), capacity.to_string());
        }
        stats.insert("delivered".into(), queue.delivered.to_string());
        stats.insert("spilled_total".into(), queue.spilled_total.to_string());
        stats.insert("rejected".into(), queue.rejected.to_string());
        let state = if self.closed || queue.closed {
            "closed"
        } else if queue.draining {
            "draining"
        } else {
            "attached"
        };
        stats.insert("state".into(), state.into());
        stats
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.detach();
    }
}
