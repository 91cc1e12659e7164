//! EventSink port - イベント通知の抽象化
//!
//! Replaces observer registration: stubs and the reconciler emit
//! `BrokerEvent`s here and any number of listeners subscribe on the
//! implementation side.

use crate::domain::BrokerEvent;

pub trait EventSink: Send + Sync {
    /// Must not block: called while a stub holds its lock.
    fn emit(&self, event: BrokerEvent);
}
