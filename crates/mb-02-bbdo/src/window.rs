//! # Ack Window
//!
//! Writer side: `outstanding` counts events sent since the last ack and never
//! exceeds `limit`. Reader side: `received_since_ack` counts events consumed
//! since this side last acknowledged; reaching `limit` means an ack is due.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckWindow {
    limit: u32,
    outstanding: u32,
    received_since_ack: u32,
    acknowledged_total: u64,
}

impl AckWindow {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            outstanding: 0,
            received_since_ack: 0,
            acknowledged_total: 0,
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Adopt the negotiated limit.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit.max(1);
    }

    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    #[must_use]
    pub fn received_since_ack(&self) -> u32 {
        self.received_since_ack
    }

    #[must_use]
    pub fn acknowledged_total(&self) -> u64 {
        self.acknowledged_total
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.outstanding >= self.limit
    }

    pub fn record_sent(&mut self) {
        self.outstanding = self.outstanding.saturating_add(1);
    }

    /// Apply a peer ack. Acks larger than the outstanding count are clamped.
    pub fn acknowledge(&mut self, count: u32) {
        let applied = count.min(self.outstanding);
        self.outstanding -= applied;
        self.acknowledged_total += u64::from(applied);
    }

    /// Count one consumed event; returns the ack to send once one is due.
    pub fn record_received(&mut self) -> Option<u32> {
        self.received_since_ack += 1;
        if self.received_since_ack >= self.limit {
            return self.take_unacknowledged();
        }
        None
    }

    /// Everything consumed but not yet acknowledged, resetting the counter.
    pub fn take_unacknowledged(&mut self) -> Option<u32> {
        let pending = std::mem::take(&mut self.received_since_ack);
        (pending > 0).then_some(pending)
    }
}
