//! Broker - ブローカーのコンテキスト
//!
//! Owns the stubs, the shared launch-wanted set and sniffed cache, the
//! reconciler and the dispatch table. Constructed once by `BrokerBuilder`
//! and passed around by `Arc`; nothing here is global.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::dispatch::DispatchTable;
use crate::app::launch_queue::LaunchQueue;
use crate::app::reconciler::{HubReconciler, PassReport, ReconcilerParts};
use crate::app::sniffed::SniffedAppCache;
use crate::app::status::BrokerStatus;
use crate::app::stub::{Stub, StubContext};
use crate::app::worker::WorkerGroup;
use crate::catalog::StubCatalog;
use crate::config::BrokerConfig;
use crate::domain::{BrokerError, ClientId, InboundMessage, Message, MessageType, StubDescriptor};
use crate::ports::{BusConnector, Clock, EventSink, ProcessLauncher};

/// Sender id used for self-test messages.
pub const SELF_TEST_SENDER: &str = "stubhub.selftest";

pub(crate) struct BrokerParts {
    pub config: BrokerConfig,
    pub catalog: Arc<StubCatalog>,
    pub selected: Vec<StubDescriptor>,
    pub bus: Arc<dyn BusConnector>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

pub struct Broker {
    config: BrokerConfig,
    catalog: Arc<StubCatalog>,
    stubs: Vec<Arc<Stub>>,
    bus: Arc<dyn BusConnector>,
    wanted: Arc<LaunchQueue>,
    sniffed: Arc<SniffedAppCache>,
    reconciler: Arc<HubReconciler>,
    dispatch: Arc<DispatchTable>,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    running: AtomicBool,
}

impl Broker {
    pub(crate) fn assemble(parts: BrokerParts) -> Self {
        let ctx = StubContext {
            bus: parts.bus.clone(),
            launcher: parts.launcher,
            events: parts.events.clone(),
            clock: parts.clock.clone(),
        };
        let default_delay = parts.config.default_prelaunch_delay();
        let stubs: Vec<Arc<Stub>> = parts
            .selected
            .into_iter()
            .map(|descriptor| {
                let delay = descriptor.prelaunch_delay(default_delay);
                Arc::new(Stub::new(descriptor, delay, ctx.clone()))
            })
            .collect();

        let wanted = Arc::new(LaunchQueue::new());
        let sniffed = Arc::new(SniffedAppCache::new());
        let reconciler = Arc::new(HubReconciler::new(ReconcilerParts {
            stubs: stubs.clone(),
            name_matching: parts.config.name_matching,
            catalog: parts.catalog.clone(),
            bus: parts.bus.clone(),
            wanted: wanted.clone(),
            sniffed: sniffed.clone(),
            events: parts.events,
            clock: parts.clock,
        }));
        let dispatch = Arc::new(DispatchTable::new(&stubs));

        Self {
            config: parts.config,
            catalog: parts.catalog,
            stubs,
            bus: parts.bus,
            wanted,
            sniffed,
            reconciler,
            dispatch,
            inbound: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &StubCatalog {
        &self.catalog
    }

    pub fn stubs(&self) -> &[Arc<Stub>] {
        &self.stubs
    }

    pub fn stub(&self, name: &str) -> Option<&Arc<Stub>> {
        self.stubs.iter().find(|s| s.name() == name)
    }

    pub fn sniffed(&self) -> &SniffedAppCache {
        &self.sniffed
    }

    /// Attach to the bus, run the first reconciliation pass and start the
    /// workers.
    pub async fn start(self: &Arc<Self>) -> Result<BrokerHandle, BrokerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.bus.attach_inbound(tx.clone());
        *self.inbound.lock() = Some(tx);

        // 初回パスより前に購読しておく
        let roster = self.bus.subscribe_roster();
        info!(stubs = self.stubs.len(), "broker starting");
        self.reconciler.reconcile().await;

        let workers = WorkerGroup::spawn(self.reconciler.clone(), roster, self.dispatch.clone(), rx);
        Ok(BrokerHandle {
            broker: Arc::clone(self),
            workers,
        })
    }

    /// Run one reconciliation pass outside the worker.
    pub async fn reconcile_now(&self) -> PassReport {
        self.reconciler.reconcile().await
    }

    /// Wait until no stub is waiting to be connected.
    pub async fn await_all_stubs_started(&self, timeout: Option<Duration>) -> Result<(), BrokerError> {
        self.wanted
            .wait_until_empty(self.config.await_poll_interval(), timeout)
            .await
    }

    /// Queue `message` on the inbound path as if the bus had delivered it to
    /// the connection of stub `name`.
    pub fn inject(&self, name: &str, sender: ClientId, message: Message) -> Result<(), BrokerError> {
        let stub = self
            .stub(name)
            .ok_or_else(|| BrokerError::UnknownStub(name.to_string()))?;
        let recipient = stub
            .connection()
            .ok_or_else(|| BrokerError::NotConnected(name.to_string()))?;
        let inbound = self.inbound.lock();
        let tx = inbound.as_ref().ok_or(BrokerError::ShutDown)?;
        tx.send(InboundMessage {
            recipient,
            sender,
            message,
        })
        .map_err(|_| BrokerError::ShutDown)
    }

    /// End-to-end check: a message sent to the tester stub must end up
    /// forwarded to the real tester application.
    pub async fn run_self_test(&self) -> Result<(), BrokerError> {
        let settings = &self.config.self_test;
        let timeout = settings.timeout();
        info!(stub = %settings.stub_name, ?timeout, "self-test started");

        self.await_all_stubs_started(Some(timeout)).await?;
        let stub = self
            .stub(&settings.stub_name)
            .ok_or_else(|| BrokerError::UnknownStub(settings.stub_name.clone()))?;
        if !stub.is_connected() {
            return Err(BrokerError::NotConnected(settings.stub_name.clone()));
        }
        let recipient = stub
            .connection()
            .ok_or_else(|| BrokerError::NotConnected(settings.stub_name.clone()))?;

        let configured = MessageType::new(settings.mtype.as_str());
        let mtype = if stub.descriptor().handles(&configured) {
            configured
        } else {
            let fallback = stub.capabilities().first().cloned().ok_or_else(|| {
                BrokerError::Unroutable {
                    mtype: configured.clone(),
                    recipient,
                }
            })?;
            warn!(stub = %stub.name(), %configured, using = %fallback, "tester does not declare the self-test type");
            fallback
        };

        let since = stub.progress();
        self.inject(
            stub.name(),
            ClientId::new(SELF_TEST_SENDER),
            Message::new(mtype, json!({ "selftest": true })),
        )?;

        let result = stub.wait_for_outcome(since, timeout).await;
        match &result {
            Ok(()) => info!(stub = %stub.name(), "self-test passed"),
            Err(err) => warn!(stub = %stub.name(), error = %err, "self-test failed"),
        }
        result
    }

    pub fn status(&self) -> BrokerStatus {
        BrokerStatus::new(
            self.stubs.iter().map(|s| s.status()).collect(),
            self.wanted.names(),
            self.sniffed.names(),
            self.reconciler.passes(),
        )
    }

    async fn disconnect_all(&self) {
        for stub in &self.stubs {
            stub.disconnect().await;
        }
    }
}

/// Running broker.
pub struct BrokerHandle {
    broker: Arc<Broker>,
    workers: WorkerGroup,
}

impl BrokerHandle {
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Stop the workers and take every stub off the bus.
    pub async fn shutdown(self) {
        info!("broker shutting down");
        self.broker.inbound.lock().take();
        self.workers.shutdown_and_join().await;
        self.broker.disconnect_all().await;
        self.broker.running.store(false, Ordering::SeqCst);
    }
}

impl std::ops::Deref for BrokerHandle {
    type Target = Broker;

    fn deref(&self) -> &Broker {
        &self.broker
    }
}
