//! Events - ブローカーが外部へ通知するイベント
//!
//! Consumers (dock GUI, reporting) subscribe through an `EventSink`; the
//! broker never calls back into them directly.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::descriptor::MessageType;
use super::message::Message;
use super::roster::{ClientMetadata, RosterEntry};
use super::state::StubState;

/// Metadata captured from a real (non-stub) client the first time its name
/// was seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SniffedApplication {
    pub name: String,
    pub metadata: ClientMetadata,
    pub subscriptions: Vec<MessageType>,
    pub first_seen: DateTime<Utc>,
}

impl SniffedApplication {
    pub fn capture(entry: &RosterEntry, at: DateTime<Utc>) -> Self {
        Self {
            name: entry.display_name.clone(),
            metadata: entry.metadata.clone(),
            subscriptions: entry.subscriptions.clone(),
            first_seen: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// A stub moved to `state`.
    StateChanged {
        stub: String,
        state: StubState,
        at: DateTime<Utc>,
    },
    /// Queued messages were dropped (launch failure, kill, disconnect).
    MessagesUndelivered {
        stub: String,
        messages: Vec<Message>,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A real application matching a stub showed up for the first time.
    ApplicationSniffed { application: SniffedApplication },
    /// A client whose name is not in the catalog showed up for the first time.
    UnknownApplication { application: SniffedApplication },
}

impl BrokerEvent {
    /// Name of the stub or application the event is about.
    pub fn subject(&self) -> &str {
        match self {
            BrokerEvent::StateChanged { stub, .. } => stub,
            BrokerEvent::MessagesUndelivered { stub, .. } => stub,
            BrokerEvent::ApplicationSniffed { application } => &application.name,
            BrokerEvent::UnknownApplication { application } => &application.name,
        }
    }
}
