//! # Shared Bus - Multiplexing Engine
//!
//! Fans every published event out to the private queue of every interested
//! subscriber.
//!
//! ```text
//! ┌──────────────┐                        ┌──────────────┐
//! │  Publisher   │    write()             │  Subscriber  │
//! │  (Stream)    │ ──────┐                │  (Stream)    │
//! └──────────────┘       │                └──────────────┘
//!                        ▼                        ↑ read()
//!                  ┌──────────────┐        ┌──────────────┐
//!                  │    Engine    │ ─────▶ │ queue, spill │
//!                  └──────────────┘        └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **No loss under backpressure:** a full live queue overflows into the
//!   subscriber's spill; only an exhausted spill refuses an event, and the
//!   publisher is told which subscribers missed it.
//! - **Per-subscriber FIFO:** each queue sees events in broadcast order.
//! - **Graceful stop:** subscribers drain what they hold, then read `Closed`.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod engine;
pub mod file_spill;
pub mod filter;
pub mod publisher;
pub(crate) mod queue;
pub mod spill;
pub mod subscriber;

pub use engine::{
    Engine, EngineConfig, EngineError, EngineState, EngineStats, PublishError, SubscriberConfig,
    DEFAULT_QUEUE_MAX_SIZE,
};
pub use file_spill::{FileSpill, SpillFileError};
pub use filter::{EventFilter, FilterError};
pub use publisher::Publisher;
pub use queue::{QueueStats, SubscriberId};
pub use spill::{MemorySpill, SpillStore, DEFAULT_SPILL_CAPACITY};
pub use subscriber::Subscriber;
