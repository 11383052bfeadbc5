//! # Spill Stores
//!
//! Overflow storage for a subscriber whose live queue is full. A spill is
//! strictly FIFO and is always drained before newer live events are served.
//!
//! [`MemorySpill`] lives and dies with its queue; a
//! [`FileSpill`](crate::file_spill::FileSpill) keeps its events across a
//! restart.

use shared_types::SharedEvent;
use std::collections::VecDeque;
use std::fmt::Debug;

/// Default bound on spilled events per subscriber.
pub const DEFAULT_SPILL_CAPACITY: usize = 100_000;

/// Backing store for events that did not fit a live queue.
pub trait SpillStore: Send + Debug {
    /// Append an event; hands it back when the store is exhausted.
    fn push(&mut self, event: SharedEvent) -> Result<(), SharedEvent>;

    /// Remove the oldest event.
    fn pop(&mut self) -> Option<SharedEvent>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of events held, if bounded.
    fn capacity(&self) -> Option<usize>;

    /// The owning queue is closing. `live` is what it still held in memory,
    /// older than anything stored here. Returns how many events outlive
    /// the close; the default keeps nothing.
    fn close(&mut self, live: Vec<SharedEvent>) -> usize {
        drop(live);
        while self.pop().is_some() {}
        0
    }
}

/// Bounded in-memory spill.
#[derive(Debug)]
pub struct MemorySpill {
    events: VecDeque<SharedEvent>,
    capacity: usize,
}

impl MemorySpill {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
        }
    }
}

impl Default for MemorySpill {
    fn default() -> Self {
        Self::new(DEFAULT_SPILL_CAPACITY)
    }
}

impl SpillStore for MemorySpill {
    fn push(&mut self, event: SharedEvent) -> Result<(), SharedEvent> {
        if self.events.len() >= self.capacity {
            return Err(event);
        }
        self.events.push_back(event);
        Ok(())
    }

    fn pop(&mut self) -> Option<SharedEvent> {
        self.events.pop_front()
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
