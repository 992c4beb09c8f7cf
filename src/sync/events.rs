//! Local phase-event multiplexer.
//!
//! The store carries state across contexts; the bus is the low-latency
//! in-context notification that a record changed. Subscribers filter by the
//! composite phase key. Dropping a receiver unsubscribes it.

use tokio::sync::broadcast;

use crate::core::types::{Phase, PhaseRecord};

#[derive(Debug, Clone)]
pub struct PhaseEvent {
    /// `data-<requestId>-<checksum>` — same key as the store record.
    pub key: String,
    pub phase: Phase,
    pub record: PhaseRecord,
}

pub struct PhaseBus {
    tx: broadcast::Sender<PhaseEvent>,
}

impl Default for PhaseBus {
    fn default() -> Self {
        // 64 in-flight events is generous for one page's worth of phases;
        // laggards re-check the store anyway.
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl PhaseBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PhaseEvent) {
        // No subscribers is fine — the record is already in the store.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PhaseEvent> {
        self.tx.subscribe()
    }
}
