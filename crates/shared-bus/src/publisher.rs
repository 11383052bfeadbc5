//! # Publisher Stream
//!
//! The injecting side of the bus: every event written is broadcast by the
//! [`Engine`]. A publisher may carry a write filter; events it does not
//! match are accepted without being published. While the engine has not
//! started and its backlog is full, writes answer
//! [`WriteOutcome::WindowFull`] and the caller keeps the event.

use crate::engine::{Engine, PublishError};
use crate::filter::EventFilter;
use async_trait::async_trait;
use shared_types::{ReadOutcome, SharedEvent, Stream, StreamError, StreamStats, WriteOutcome};
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct Publisher {
    engine: Engine,
    name: String,
    filter: EventFilter,
    closed: bool,
    published: u64,
    skipped: u64,
}

impl Publisher {
    pub fn new(engine: Engine, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            filter: EventFilter::All,
            closed: false,
            published: 0,
            skipped: 0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Stream for Publisher {
    async fn read(&mut self, _deadline: Option<Instant>) -> Result<ReadOutcome, StreamError> {
        Err(StreamError::Unsupported("read on a publisher"))
    }

    async fn write(&mut self, event: SharedEvent) -> Result<WriteOutcome, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if event.is_internal() || !self.filter.matches(event.type_code()) {
            self.skipped += 1;
            trace!(publisher = %self.name, type_code = %event.type_code(), "Event filtered out");
            return Ok(WriteOutcome::Accepted(0));
        }
        match self.engine.publish(event) {
            Err(PublishError::BacklogFull { capacity }) => {
                trace!(publisher = %self.name, capacity, "Engine backlog full, holding back");
                Ok(WriteOutcome::WindowFull)
            }
            result => {
                self.published += 1;
                result?;
                Ok(WriteOutcome::Accepted(1))
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if !self.closed {
            self.closed = true;
            debug!(publisher = %self.name, published = self.published, "Publisher closed");
        }
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        let mut stats = self.engine.stats().to_map();
        stats.insert("kind".into(), "publisher".into());
        stats.insert("name".into(), self.name.clone());
        stats.insert("filter".into(), self.filter.to_string());
        stats.insert("written".into(), self.published.to_string());
        stats.insert("skipped".into(), self.skipped.to_string());
        stats.insert(
            "state".into(),
            if self.closed { "closed" } else { "open" }.into(),
        );
        stats
    }
}
