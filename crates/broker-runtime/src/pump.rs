//! # Forwarding Pumps
//!
//! A pump moves events from one stream to another until the source ends, an
//! error occurs, or shutdown is signalled.
//!
//! Reads use a short deadline so the shutdown flag is checked between
//! events without cancelling a read halfway through a frame. Output pumps
//! keep going after shutdown so the subscriber can drain; they end when the
//! stopped engine reports the queue `Closed`.
//!
//! ## Carry-over
//!
//! The caller owns a queue of events to write before anything new is read.
//! When the sink fails, the event in hand goes back to the front of that
//! queue, so a reconnecting caller can hand it to the next pump.

use crate::endpoint::EndpointStream;
use shared_types::{ReadOutcome, SharedEvent, Stream, StreamError, WriteOutcome};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// How often a blocked pump looks at the shutdown flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The source will produce nothing more.
    SourceClosed,
    /// Shutdown was signalled and the pump does not drain.
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct PumpOptions {
    pub poll_interval: Duration,
    /// Keep forwarding after shutdown until the source closes.
    pub drain_on_shutdown: bool,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_on_shutdown: false,
        }
    }
}

/// Counters of a pump run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub exit: PumpExit,
    pub forwarded: u64,
    /// Events some subscribers could not take (spill exhausted).
    pub partial: u64,
}

/// Forward `carry`, then `source`, into `sink`. Neither stream is closed
/// here.
///
/// On a sink error, or on shutdown while the sink window is full, the event
/// in hand is pushed back onto the front of `carry`.
pub async fn pump(
    name: &str,
    source: &mut EndpointStream,
    sink: &mut EndpointStream,
    carry: &mut VecDeque<SharedEvent>,
    shutdown: &watch::Receiver<bool>,
    options: PumpOptions,
) -> Result<PumpReport, StreamError> {
    let mut report = PumpReport {
        exit: PumpExit::SourceClosed,
        forwarded: 0,
        partial: 0,
    };
    loop {
        let stopping = *shutdown.borrow();
        if stopping && !options.drain_on_shutdown {
            report.exit = PumpExit::Shutdown;
            break;
        }
        let event = match carry.pop_front() {
            Some(event) => event,
            None => {
                let deadline = Instant::now() + options.poll_interval;
                match source.read(Some(deadline)).await? {
                    ReadOutcome::Event(event) => event,
                    ReadOutcome::Timeout => continue,
                    ReadOutcome::Closed => break,
                }
            }
        };

        loop {
            let deadline = Instant::now() + options.poll_interval;
            match sink.write_until(event.clone(), Some(deadline)).await {
                Ok(WriteOutcome::Accepted(_)) => {
                    report.forwarded += 1;
                    break;
                }
                Ok(WriteOutcome::WindowFull) => {
                    if *shutdown.borrow() && !options.drain_on_shutdown {
                        warn!(pump = %name, carried = carry.len() + 1, "Shutdown while the sink window is full");
                        carry.push_front(event);
                        report.exit = PumpExit::Shutdown;
                        return Ok(report);
                    }
                    trace!(pump = %name, "Sink window full, waiting for ack");
                }
                Err(StreamError::SpillExhausted {
                    delivered,
                    subscribers,
                }) => {
                    report.partial += 1;
                    warn!(pump = %name, delivered, ?subscribers, "Event not delivered to every subscriber");
                    break;
                }
                Err(e) => {
                    carry.push_front(event);
                    return Err(e);
                }
            }
        }
    }
    debug!(pump = %name, exit = ?report.exit, forwarded = report.forwarded, "Pump finished");
    Ok(report)
}
