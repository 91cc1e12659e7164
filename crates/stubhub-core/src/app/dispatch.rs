//! DispatchTable - メッセージ種別からスタブへのルーティング
//!
//! One map from message type to the stubs declaring it, built once when the
//! broker is assembled. An inbound message goes to the candidate whose bus
//! connection it was addressed to.
//!
//! `StubLanes` then hands it over on a per-stub ordered channel, so one stub
//! waiting out its pre-forward delay never holds up another stub's traffic.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::app::stub::Stub;
use crate::domain::{BrokerError, InboundMessage, Message, MessageType};

pub struct DispatchTable {
    routes: HashMap<MessageType, Vec<Arc<Stub>>>,
}

impl DispatchTable {
    pub fn new(stubs: &[Arc<Stub>]) -> Self {
        let mut routes: HashMap<MessageType, Vec<Arc<Stub>>> = HashMap::new();
        for stub in stubs {
            for mtype in stub.capabilities() {
                routes.entry(mtype.clone()).or_default().push(Arc::clone(stub));
            }
        }
        Self { routes }
    }

    /// Message types with at least one stub.
    pub fn message_types(&self) -> Vec<&MessageType> {
        let mut types: Vec<_> = self.routes.keys().collect();
        types.sort();
        types
    }

    pub fn route(&self, inbound: &InboundMessage) -> Result<Arc<Stub>, BrokerError> {
        let unroutable = || BrokerError::Unroutable {
            mtype: inbound.message.mtype.clone(),
            recipient: inbound.recipient,
        };
        self.routes
            .get(&inbound.message.mtype)
            .and_then(|stubs| {
                stubs
                    .iter()
                    .find(|stub| stub.connection() == Some(inbound.recipient))
            })
            .cloned()
            .ok_or_else(unroutable)
    }

    /// Hand `inbound` to its stub.
    ///
    /// Returns whether the stub accepted the message.
    pub async fn dispatch(&self, inbound: InboundMessage) -> Result<bool, BrokerError> {
        let stub = self.route(&inbound)?;
        debug!(stub = %stub.name(), sender = %inbound.sender, mtype = %inbound.message.mtype, "dispatching inbound message");
        let accepted = stub.receive(inbound.message).await;
        if !accepted {
            warn!(stub = %stub.name(), "inbound message refused");
        }
        Ok(accepted)
    }
}

/// One ordered inbound lane per stub, each drained by its own task.
///
/// Lanes open on first use. Arrival order holds per stub, not across stubs.
#[derive(Default)]
pub struct StubLanes {
    lanes: HashMap<String, mpsc::UnboundedSender<Message>>,
    tasks: JoinSet<()>,
}

impl StubLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for `stub` without waiting for the stub.
    pub fn push(&mut self, stub: &Arc<Stub>, message: Message) {
        let tasks = &mut self.tasks;
        let lane = self.lanes.entry(stub.name().to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.spawn(drain_lane(Arc::clone(stub), rx));
            debug!(stub = %stub.name(), "inbound lane opened");
            tx
        });
        if lane.send(message).is_err() {
            warn!(stub = %stub.name(), "inbound lane closed, message dropped");
        }
    }

    /// Close every lane and wait until the queued messages are handed over.
    pub async fn close(mut self) {
        self.lanes.clear();
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn drain_lane(stub: Arc<Stub>, mut lane: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = lane.recv().await {
        if !stub.receive(message).await {
            warn!(stub = %stub.name(), "inbound message refused");
        }
    }
    debug!(stub = %stub.name(), "inbound lane closed");
}
