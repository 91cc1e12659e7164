//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::app::stub::StubContext;
use crate::domain::{
    BrokerEvent, BusError, ClientId, ClientMetadata, ConnectionId, InboundMessage, LaunchError,
    LaunchId, Message, MessageType, RosterEntry, StubState,
};
use crate::impls::InMemoryBus;
use crate::ports::{
    BusConnector, EventSink, IdGenerator, LaunchOutcome, LaunchStatus, LaunchTicket,
    ProcessLauncher, RosterChange, SystemClock, UlidGenerator,
};

pub fn stub_context(
    bus: Arc<dyn BusConnector>,
    launcher: Arc<dyn ProcessLauncher>,
    events: Arc<dyn EventSink>,
) -> StubContext {
    StubContext {
        bus,
        launcher,
        events,
        clock: Arc::new(SystemClock),
    }
}

struct Outstanding {
    id: LaunchId,
    locator: String,
    done: oneshot::Sender<LaunchOutcome>,
}

#[derive(Default)]
struct Script {
    launched: Vec<String>,
    cancelled: Vec<LaunchId>,
    outstanding: VecDeque<Outstanding>,
    max_outstanding: usize,
    auto: Option<LaunchOutcome>,
    refuse: bool,
}

/// Launcher whose launches complete only when the test says so.
pub struct ScriptedLauncher {
    ids: UlidGenerator<SystemClock>,
    script: Mutex<Script>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            ids: UlidGenerator::new(SystemClock),
            script: Mutex::new(Script::default()),
        }
    }

    /// Every launch completes immediately with `outcome`.
    pub fn completing_with(outcome: LaunchOutcome) -> Self {
        let launcher = Self::new();
        launcher.script.lock().auto = Some(outcome);
        launcher
    }

    /// Make `launch` fail before anything starts.
    pub fn refuse_launches(&self) {
        self.script.lock().refuse = true;
    }

    /// Complete the oldest outstanding launch.
    pub fn complete_next(&self, outcome: LaunchOutcome) -> bool {
        let next = self.script.lock().outstanding.pop_front();
        match next {
            Some(launch) => launch.done.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Complete the oldest outstanding launch of `locator`.
    pub fn complete(&self, locator: &str, outcome: LaunchOutcome) -> bool {
        let next = {
            let mut script = self.script.lock();
            let index = script.outstanding.iter().position(|o| o.locator == locator);
            index.and_then(|i| script.outstanding.remove(i))
        };
        match next {
            Some(launch) => launch.done.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.script.lock().launched.clone()
    }

    pub fn cancelled(&self) -> Vec<LaunchId> {
        self.script.lock().cancelled.clone()
    }

    /// Highest number of launches outstanding at the same time.
    pub fn max_outstanding(&self) -> usize {
        self.script.lock().max_outstanding
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, locator: &str) -> Result<LaunchTicket, LaunchError> {
        let mut script = self.script.lock();
        if script.refuse {
            return Err(LaunchError::Spawn {
                program: "scripted".to_string(),
                locator: locator.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "refused"),
            });
        }

        let id = self.ids.generate_launch_id();
        let (done, completion) = oneshot::channel();
        script.launched.push(locator.to_string());
        match script.auto.clone() {
            Some(outcome) => {
                let _ = done.send(outcome);
            }
            None => {
                script.outstanding.push_back(Outstanding {
                    id,
                    locator: locator.to_string(),
                    done,
                });
                script.max_outstanding = script.max_outstanding.max(script.outstanding.len());
            }
        }
        Ok(LaunchTicket { id, completion })
    }

    async fn cancel(&self, id: LaunchId) {
        let mut script = self.script.lock();
        script.cancelled.push(id);
        if let Some(index) = script.outstanding.iter().position(|o| o.id == id)
            && let Some(launch) = script.outstanding.remove(index)
        {
            let _ = launch.done.send(LaunchOutcome::new(LaunchStatus::Cancelled));
        }
    }
}

/// Event sink that keeps everything.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BrokerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn states_of(&self, stub: &str) -> Vec<StubState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::StateChanged { stub: s, state, .. } if s == stub => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn undelivered_of(&self, stub: &str) -> Vec<Vec<Message>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::MessagesUndelivered { stub: s, messages, .. } if s == stub => {
                    Some(messages.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn sniffed(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::ApplicationSniffed { application } => Some(application.name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn unknown(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::UnknownApplication { application } => Some(application.name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: BrokerEvent) {
        self.events.lock().push(event);
    }
}

/// `InMemoryBus` whose `register` takes `delay`, like a hub behind real I/O.
pub struct SlowRegisterBus {
    inner: Arc<InMemoryBus>,
    delay: Duration,
    registering: AtomicUsize,
    max_registering: AtomicUsize,
}

impl SlowRegisterBus {
    pub fn new(inner: Arc<InMemoryBus>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            registering: AtomicUsize::new(0),
            max_registering: AtomicUsize::new(0),
        }
    }

    /// Highest number of registrations in progress at the same time.
    pub fn max_registering(&self) -> usize {
        self.max_registering.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusConnector for SlowRegisterBus {
    async fn register(&self, metadata: &ClientMetadata) -> Result<ConnectionId, BusError> {
        let now = self.registering.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_registering.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.register(metadata).await;
        self.registering.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn declare_capabilities(
        &self,
        connection: ConnectionId,
        capabilities: &[MessageType],
    ) -> Result<(), BusError> {
        self.inner.declare_capabilities(connection, capabilities).await
    }

    async fn send(
        &self,
        connection: ConnectionId,
        recipient: &ClientId,
        message: &Message,
    ) -> Result<(), BusError> {
        self.inner.send(connection, recipient, message).await
    }

    async fn deregister(&self, connection: ConnectionId) {
        self.inner.deregister(connection).await
    }

    async fn list_clients(&self) -> Vec<RosterEntry> {
        self.inner.list_clients().await
    }

    fn is_active(&self, connection: ConnectionId) -> bool {
        self.inner.is_active(connection)
    }

    fn client_id(&self, connection: ConnectionId) -> Option<ClientId> {
        self.inner.client_id(connection)
    }

    fn subscribe_roster(&self) -> broadcast::Receiver<RosterChange> {
        self.inner.subscribe_roster()
    }

    fn attach_inbound(&self, sink: mpsc::UnboundedSender<InboundMessage>) {
        self.inner.attach_inbound(sink)
    }
}
