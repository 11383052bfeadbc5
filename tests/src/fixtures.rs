//! # Test Fixtures
//!
//! Shared builders for events and streams.

use mb_01_event_codec::EventCodec;
use mb_02_bbdo::{memory_pair, BbdoConfig, BbdoStream, Role, Transport};
use shared_types::catalogue::neb::{HostStatus, ServiceStatus};
use shared_types::catalogue::storage::Metric;
use shared_types::{Event, EventRegistry, ReadOutcome, SharedEvent, Stream, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Buffer size of in-memory transports.
pub const PIPE_SIZE: usize = 64 * 1024;

#[must_use]
pub fn codec() -> EventCodec {
    EventCodec::new(Arc::new(EventRegistry::builtin()))
}

#[must_use]
pub fn deadline_in(millis: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(millis))
}

#[must_use]
pub fn service_status(host_id: u32, service_id: u32) -> SharedEvent {
    Event::new(ServiceStatus {
        host_id,
        service_id,
        output: format!("OK - service {service_id} on host {host_id}"),
        perf_data: "rta=0.2ms;100;500;0".into(),
        latency: 0.125,
        ..ServiceStatus::default()
    })
    .into_shared()
}

#[must_use]
pub fn host_status(host_id: u32) -> SharedEvent {
    Event::new(HostStatus {
        host_id,
        output: "PING OK".into(),
        ..HostStatus::default()
    })
    .into_shared()
}

#[must_use]
pub fn metric(metric_id: u32, value: f64) -> SharedEvent {
    Event::new(Metric {
        metric_id,
        value,
        ..Metric::default()
    })
    .into_shared()
}

/// Two BBDO streams joined by an in-memory pipe: (client, server).
#[must_use]
pub fn bbdo_pair(
    client: BbdoConfig,
    server: BbdoConfig,
) -> (BbdoStream<Transport>, BbdoStream<Transport>) {
    let (a, b) = memory_pair(PIPE_SIZE);
    (
        BbdoStream::new(a, Role::Client, codec(), client).with_peer("memory://client"),
        BbdoStream::new(b, Role::Server, codec(), server).with_peer("memory://server"),
    )
}

/// Read until something other than a timeout happens, giving up after `total`.
pub async fn next_outcome<S: Stream>(
    stream: &mut S,
    total: Duration,
) -> Result<ReadOutcome, StreamError> {
    let give_up = Instant::now() + total;
    loop {
        match stream.read(Some(Instant::now() + Duration::from_millis(50))).await? {
            ReadOutcome::Timeout if Instant::now() < give_up => continue,
            other => return Ok(other),
        }
    }
}

/// Collect `count` events, failing on anything else.
pub async fn collect_events<S: Stream>(
    stream: &mut S,
    count: usize,
) -> Result<Vec<SharedEvent>, StreamError> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        match next_outcome(stream, Duration::from_secs(5)).await? {
            ReadOutcome::Event(event) => events.push(event),
            other => {
                return Err(StreamError::Io(std::io::Error::other(format!(
                    "expected an event after {} of {count}, got {other:?}",
                    events.len()
                ))))
            }
        }
    }
    Ok(events)
}
