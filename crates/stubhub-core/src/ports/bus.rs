//! BusConnector port - the publish/subscribe bus as seen by the broker.
//!
//! The wire protocol lives behind this trait. `impls::InMemoryBus` is the
//! development implementation.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::domain::{
    BusError, ClientId, ClientMetadata, ConnectionId, InboundMessage, Message, MessageType,
    RosterEntry,
};

/// Kind of roster change that triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Registered,
    Unregistered,
    MetadataChanged,
    SubscriptionsChanged,
}

/// Bus client used by the broker: one registration per connected stub.
///
/// # 設計原則
/// - Roster notifications are a broadcast: a lagging receiver only loses
///   notifications, never roster state, because every pass re-reads
///   `list_clients()`.
/// - Inbound messages go to a single sink attached by the broker and are
///   routed there, not per-capability handlers.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Register a new client declaring `metadata`.
    async fn register(&self, metadata: &ClientMetadata) -> Result<ConnectionId, BusError>;

    /// Subscribe `connection` to `capabilities`.
    async fn declare_capabilities(
        &self,
        connection: ConnectionId,
        capabilities: &[MessageType],
    ) -> Result<(), BusError>;

    /// Send `message` from `connection` to `recipient`.
    async fn send(
        &self,
        connection: ConnectionId,
        recipient: &ClientId,
        message: &Message,
    ) -> Result<(), BusError>;

    /// Leave the bus. Unknown connections are ignored.
    async fn deregister(&self, connection: ConnectionId);

    /// Snapshot of every registered client.
    async fn list_clients(&self) -> Vec<RosterEntry>;

    /// Is `connection` still registered and live?
    fn is_active(&self, connection: ConnectionId) -> bool;

    /// Public client id of `connection`, if registered.
    fn client_id(&self, connection: ConnectionId) -> Option<ClientId>;

    fn subscribe_roster(&self) -> broadcast::Receiver<RosterChange>;

    /// Route every message addressed to a broker connection into `sink`.
    fn attach_inbound(&self, sink: mpsc::UnboundedSender<InboundMessage>);
}
