//! EventSink implementations.
//!
//! - `BroadcastEventSink`: fan-out to any number of subscribers (GUI, CLI)
//! - `NoopEventSink`: discards everything

use tokio::sync::broadcast;

use crate::domain::BrokerEvent;
use crate::ports::EventSink;

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out event sink.
///
/// Slow subscribers lose the oldest events (`RecvError::Lagged`); emitting
/// never blocks.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<BrokerEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: BrokerEvent) {
        // 購読者ゼロでも送信は成功扱い
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: BrokerEvent) {}
}
