//! InMemoryBus - 開発用のバス実装
//!
//! A single-process stand-in for the hub: a roster of registered clients,
//! roster-change notifications, and message delivery.
//!
//! # 学習ポイント
//! - parking_lot::Mutex for short critical sections that never await
//! - broadcast for fan-out notifications, mpsc for the single inbound sink
//!
//! Clients registered through `BusConnector::register` belong to the broker:
//! messages sent to them are pushed into the attached inbound sink. Clients
//! added with `register_real_client` stand for external applications and
//! only collect what they receive (see `received_by`).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::domain::{
    BusError, ClientId, ClientMetadata, ConnectionId, InboundMessage, Message, MessageType,
    RosterEntry,
};
use crate::ports::{BusConnector, IdGenerator, RosterChange, SystemClock, UlidGenerator};

const ROSTER_CAPACITY: usize = 256;

struct Client {
    client_id: ClientId,
    connection: ConnectionId,
    metadata: ClientMetadata,
    subscriptions: Vec<MessageType>,
    broker_owned: bool,
}

impl Client {
    fn entry(&self) -> RosterEntry {
        RosterEntry::new(
            self.client_id.clone(),
            self.metadata.clone(),
            self.subscriptions.clone(),
        )
    }
}

struct BusState {
    reachable: bool,
    next_client: u64,
    /// registration order
    clients: Vec<Client>,
    inboxes: HashMap<ClientId, Vec<Message>>,
    failing: Vec<Message>,
}

pub struct InMemoryBus {
    ids: UlidGenerator<SystemClock>,
    state: Mutex<BusState>,
    roster_tx: broadcast::Sender<RosterChange>,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (roster_tx, _) = broadcast::channel(ROSTER_CAPACITY);
        Self {
            ids: UlidGenerator::new(SystemClock),
            state: Mutex::new(BusState {
                reachable: true,
                next_client: 1,
                clients: Vec::new(),
                inboxes: HashMap::new(),
                failing: Vec::new(),
            }),
            roster_tx,
            inbound: Mutex::new(None),
        }
    }

    /// Simulate the hub going away (or coming back).
    ///
    /// While unreachable, registration and sends fail and no connection is
    /// reported active.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Make every send of `message` fail.
    pub fn fail_sends_matching(&self, message: Message) {
        self.state.lock().failing.push(message);
    }

    /// Register an external application with its subscriptions.
    pub fn register_real_client(
        &self,
        metadata: ClientMetadata,
        subscriptions: Vec<MessageType>,
    ) -> ClientId {
        let client_id = self.add_client(metadata, subscriptions, false);
        self.notify(RosterChange::Registered);
        client_id
    }

    /// Remove a client by id, whoever registered it.
    pub fn remove_client(&self, client_id: &ClientId) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.clients.len();
            state.clients.retain(|c| &c.client_id != client_id);
            before != state.clients.len()
        };
        if removed {
            debug!(%client_id, "client removed");
            self.notify(RosterChange::Unregistered);
        }
    }

    /// Replace a client's metadata.
    pub fn update_metadata(&self, client_id: &ClientId, metadata: ClientMetadata) {
        let updated = {
            let mut state = self.state.lock();
            match state.clients.iter_mut().find(|c| &c.client_id == client_id) {
                Some(client) => {
                    client.metadata = metadata;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.notify(RosterChange::MetadataChanged);
        }
    }

    /// Deliver `message` from an external client to `recipient`.
    pub fn deliver(
        &self,
        sender: &ClientId,
        recipient: &ClientId,
        message: Message,
    ) -> Result<(), BusError> {
        self.route(sender.clone(), recipient, message)
    }

    /// Everything `client_id` received so far, in delivery order.
    pub fn received_by(&self, client_id: &ClientId) -> Vec<Message> {
        self.state
            .lock()
            .inboxes
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of clients currently registered under `name`.
    pub fn clients_named(&self, name: &str) -> Vec<ClientId> {
        self.state
            .lock()
            .clients
            .iter()
            .filter(|c| c.metadata.name() == Some(name))
            .map(|c| c.client_id.clone())
            .collect()
    }

    fn add_client(
        &self,
        metadata: ClientMetadata,
        subscriptions: Vec<MessageType>,
        broker_owned: bool,
    ) -> ClientId {
        let connection = self.ids.generate_connection_id();
        let mut state = self.state.lock();
        let client_id = ClientId::new(format!("c{}", state.next_client));
        state.next_client += 1;
        debug!(%client_id, %connection, name = ?metadata.name(), broker_owned, "client registered");
        state.clients.push(Client {
            client_id: client_id.clone(),
            connection,
            metadata,
            subscriptions,
            broker_owned,
        });
        client_id
    }

    fn route(
        &self,
        sender: ClientId,
        recipient: &ClientId,
        message: Message,
    ) -> Result<(), BusError> {
        let target = {
            let mut state = self.state.lock();
            if !state.reachable {
                return Err(BusError::Unreachable("hub is down".to_string()));
            }
            if state.failing.contains(&message) {
                return Err(BusError::SendFailed {
                    recipient: recipient.clone(),
                    reason: "delivery refused".to_string(),
                });
            }
            let Some(client) = state.clients.iter().find(|c| &c.client_id == recipient) else {
                return Err(BusError::SendFailed {
                    recipient: recipient.clone(),
                    reason: "no such client".to_string(),
                });
            };
            let target = client.broker_owned.then_some(client.connection);
            state
                .inboxes
                .entry(recipient.clone())
                .or_default()
                .push(message.clone());
            target
        };

        trace!(%sender, %recipient, mtype = %message.mtype, "message delivered");
        if let Some(connection) = target
            && let Some(inbound) = self.inbound.lock().as_ref()
        {
            // 受信側が閉じていても配送自体は成功扱い
            let _ = inbound.send(InboundMessage {
                recipient: connection,
                sender,
                message,
            });
        }
        Ok(())
    }

    fn notify(&self, change: RosterChange) {
        // 購読者がいなくても問題ない
        let _ = self.roster_tx.send(change);
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusConnector for InMemoryBus {
    async fn register(&self, metadata: &ClientMetadata) -> Result<ConnectionId, BusError> {
        if !self.state.lock().reachable {
            return Err(BusError::Unreachable("hub is down".to_string()));
        }
        let client_id = self.add_client(metadata.clone(), Vec::new(), true);
        self.notify(RosterChange::Registered);

        let state = self.state.lock();
        state
            .clients
            .iter()
            .find(|c| c.client_id == client_id)
            .map(|c| c.connection)
            .ok_or_else(|| BusError::Rejected(format!("{client_id} vanished during registration")))
    }

    async fn declare_capabilities(
        &self,
        connection: ConnectionId,
        capabilities: &[MessageType],
    ) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            if !state.reachable {
                return Err(BusError::Unreachable("hub is down".to_string()));
            }
            let client = state
                .clients
                .iter_mut()
                .find(|c| c.connection == connection)
                .ok_or(BusError::UnknownConnection(connection))?;
            client.subscriptions = capabilities.to_vec();
        }
        self.notify(RosterChange::SubscriptionsChanged);
        Ok(())
    }

    async fn send(
        &self,
        connection: ConnectionId,
        recipient: &ClientId,
        message: &Message,
    ) -> Result<(), BusError> {
        let sender = self
            .client_id(connection)
            .ok_or(BusError::UnknownConnection(connection))?;
        self.route(sender, recipient, message.clone())
    }

    async fn deregister(&self, connection: ConnectionId) {
        if let Some(client_id) = self.client_id(connection) {
            self.remove_client(&client_id);
        }
    }

    async fn list_clients(&self) -> Vec<RosterEntry> {
        let state = self.state.lock();
        if !state.reachable {
            return Vec::new();
        }
        state.clients.iter().map(Client::entry).collect()
    }

    fn is_active(&self, connection: ConnectionId) -> bool {
        let state = self.state.lock();
        state.reachable && state.clients.iter().any(|c| c.connection == connection)
    }

    fn client_id(&self, connection: ConnectionId) -> Option<ClientId> {
        self.state
            .lock()
            .clients
            .iter()
            .find(|c| c.connection == connection)
            .map(|c| c.client_id.clone())
    }

    fn subscribe_roster(&self) -> broadcast::Receiver<RosterChange> {
        self.roster_tx.subscribe()
    }

    fn attach_inbound(&self, sink: mpsc::UnboundedSender<InboundMessage>) {
        *self.inbound.lock() = Some(sink);
    }
}
