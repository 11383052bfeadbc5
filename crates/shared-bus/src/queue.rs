//! # Subscriber Queues
//!
//! Each subscriber owns one queue: a bounded live part, an overflow spill and
//! a [`Notify`] to wake its reader. The live queue never exceeds its bound;
//! once anything is spilled, new events go to the spill too, so delivery
//! order is always the engine's broadcast order.

use crate::filter::EventFilter;
use crate::spill::SpillStore;
use parking_lot::Mutex;
use shared_types::{ReadOutcome, SharedEvent};
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one subscription.
pub type SubscriberId = Uuid;

/// Where a pushed event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    Spilled,
    /// Live queue and spill are both full.
    Rejected,
    /// The subscriber is gone or draining.
    Detached,
}

#[derive(Debug)]
struct QueueState {
    live: VecDeque<SharedEvent>,
    spill: Box<dyn SpillStore>,
    draining: bool,
    closed: bool,
    delivered: u64,
    spilled: u64,
    rejected: u64,
}

#[derive(Debug)]
pub(crate) struct SubscriberQueue {
    id: SubscriberId,
    name: String,
    filter: EventFilter,
    max_size: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub live: usize,
    pub spilled_now: usize,
    pub max_size: usize,
    pub spill_capacity: Option<usize>,
    pub delivered: u64,
    pub spilled_total: u64,
    pub rejected: u64,
    pub draining: bool,
    pub closed: bool,
}

impl SubscriberQueue {
    pub(crate) fn new(
        name: String,
        filter: EventFilter,
        max_size: usize,
        spill: Box<dyn SpillStore>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            filter,
            max_size: max_size.max(1),
            state: Mutex::new(QueueState {
                live: VecDeque::new(),
                spill,
                draining: false,
                closed: false,
                delivered: 0,
                spilled: 0,
                rejected: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub(crate) fn push(&self, event: SharedEvent) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed || state.draining {
                return PushOutcome::Detached;
            }
            if state.spill.is_empty() && state.live.len() < self.max_size {
                state.live.push_back(event);
                PushOutcome::Queued
            } else {
                let first_spill = state.spill.is_empty();
                match state.spill.push(event) {
                    Ok(()) => {
                        state.spilled += 1;
                        if first_spill {
                            debug!(subscriber = %self.name, live = state.live.len(), "Live queue full, spilling");
                        }
                        PushOutcome::Spilled
                    }
                    Err(_) => {
                        state.rejected += 1;
                        warn!(
                            subscriber = %self.name,
                            spilled = state.spill.len(),
                            "Spill exhausted, event not delivered"
                        );
                        PushOutcome::Rejected
                    }
                }
            }
        };
        if outcome != PushOutcome::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    /// Take the oldest event, then top the live queue up from the spill.
    fn pop(state: &mut QueueState, max_size: usize) -> Option<SharedEvent> {
        if state.closed {
            return None;
        }
        let event = state.live.pop_front().or_else(|| state.spill.pop())?;
        while state.live.len() < max_size {
            match state.spill.pop() {
                Some(spilled) => state.live.push_back(spilled),
                None => break,
            }
        }
        state.delivered += 1;
        Some(event)
    }

    pub(crate) fn try_pop(&self) -> Option<SharedEvent> {
        Self::pop(&mut self.state.lock(), self.max_size)
    }

    /// Wait for the next event, the deadline, or the end of the queue.
    pub(crate) async fn recv(&self, deadline: Option<Instant>) -> ReadOutcome {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(event) = Self::pop(&mut state, self.max_size) {
                    return ReadOutcome::Event(event);
                }
                if state.closed || state.draining {
                    return ReadOutcome::Closed;
                }
            }
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return ReadOutcome::Timeout;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stop accepting events; what is queued can still be read.
    pub(crate) fn drain(&self) {
        self.state.lock().draining = true;
        self.wake_all();
    }

    /// Stop accepting events and hand what is queued to the spill, which
    /// keeps as much as it can persist. Returns the number of events lost.
    pub(crate) fn close(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let live: Vec<_> = state.live.drain(..).collect();
            let held = live.len() + state.spill.len();
            let kept = state.spill.close(live);
            if kept > 0 {
                debug!(subscriber = %self.name, kept, "Queued events persisted");
            }
            held.saturating_sub(kept)
        };
        self.wake_all();
        dropped
    }

    fn wake_all(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            live: state.live.len(),
            spilled_now: state.spill.len(),
            max_size: self.max_size,
            spill_capacity: state.spill.capacity(),
            delivered: state.delivered,
            spilled_total: state.spilled,
            rejected: state.rejected,
            draining: state.draining,
            closed: state.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spill::MemorySpill;
    use shared_types::catalogue::internal::Ack;
    use shared_types::Event;
    use std::sync::Arc;
    use std::time::Duration;

    fn ack(n: u32) -> SharedEvent {
        Event::new(Ack {
            acknowledged_events: n,
        })
        .into_shared()
    }

    fn number(outcome: ReadOutcome) -> u32 {
        outcome
            .into_event()
            .and_then(|e| e.downcast_ref::<Ack>().map(|a| a.acknowledged_events))
            .unwrap()
    }

    fn queue(max: usize, spill: usize) -> SubscriberQueue {
        SubscriberQueue::new(
            "test".into(),
            EventFilter::All,
            max,
            Box::new(MemorySpill::new(spill)),
        )
    }

    #[tokio::test]
    async fn test_overflow_spills_and_keeps_order() {
        let q = queue(2, 10);
        let outcomes: Vec<_> = (1..=5).map(|n| q.push(ack(n))).collect();
        assert_eq!(
            outcomes,
            [
                PushOutcome::Queued,
                PushOutcome::Queued,
                PushOutcome::Spilled,
                PushOutcome::Spilled,
                PushOutcome::Spilled
            ]
        );

        assert_eq!(number(q.recv(None).await), 1);
        // The live queue has room again, yet new events queue behind the spill.
        assert_eq!(q.push(ack(6)), PushOutcome::Spilled);
        let stats = q.stats();
        assert!(stats.live <= 2);
        for n in 2..=6 {
            assert_eq!(number(q.recv(None).await), n);
        }
        assert_eq!(q.stats().spilled_now, 0);
        assert_eq!(q.push(ack(7)), PushOutcome::Queued);
    }

    #[tokio::test]
    async fn test_exhausted_spill_rejects() {
        let q = queue(1, 1);
        assert_eq!(q.push(ack(1)), PushOutcome::Queued);
        assert_eq!(q.push(ack(2)), PushOutcome::Spilled);
        assert_eq!(q.push(ack(3)), PushOutcome::Rejected);
        assert_eq!(q.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_recv_times_out_then_wakes_on_push() {
        let q = Arc::new(queue(4, 0));
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(q.recv(Some(deadline)).await, ReadOutcome::Timeout);

        let reader = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv(None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(ack(9));
        let outcome = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(number(outcome), 9);
    }

    #[tokio::test]
    async fn test_drain_then_closed() {
        let q = queue(1, 4);
        q.push(ack(1));
        q.push(ack(2));
        q.drain();
        assert_eq!(q.push(ack(3)), PushOutcome::Detached);
        assert_eq!(number(q.recv(None).await), 1);
        assert_eq!(number(q.recv(None).await), 2);
        assert_eq!(q.recv(None).await, ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_reader() {
        let q = Arc::new(queue(1, 0));
        let reader = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv(None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(q.close(), 0);
        let outcome = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_counts_what_the_spill_cannot_keep() {
        let q = queue(2, 10);
        for n in 1..=5 {
            q.push(ack(n));
        }
        assert_eq!(q.close(), 5);
        assert_eq!(q.close(), 0);
        assert!(q.try_pop().is_none());
        assert_eq!(q.push(ack(6)), PushOutcome::Detached);
    }

    #[tokio::test]
    async fn test_close_hands_live_events_to_a_persistent_spill() {
        use crate::file_spill::FileSpill;
        use mb_01_event_codec::EventCodec;
        use shared_types::EventRegistry;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("q.spill");
        let codec = EventCodec::new(Arc::new(EventRegistry::builtin()));
        let q = SubscriberQueue::new(
            "disk".into(),
            EventFilter::All,
            2,
            Box::new(FileSpill::open(&path, codec.clone(), 10).unwrap()),
        );
        for n in 1..=4 {
            q.push(ack(n));
        }
        assert_eq!(q.stats().spilled_now, 2);
        assert_eq!(q.close(), 0);
        assert!(q.try_pop().is_none());
        assert!(path.exists());

        let reopened = SubscriberQueue::new(
            "disk".into(),
            EventFilter::All,
            2,
            Box::new(FileSpill::open(&path, codec, 10).unwrap()),
        );
        for n in 1..=4 {
            assert_eq!(number(reopened.recv(None).await), n);
        }
        assert!(!path.exists());
    }
}
