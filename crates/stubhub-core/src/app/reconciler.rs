//! HubReconciler - ロスターとスタブの突き合わせ
//!
//! One pass compares a roster snapshot with every stub:
//! - an entry carrying the stub's own flag is its own registration: skipped
//! - a real entry while the stub is connected is the real application:
//!   recorded once, then `forward()` runs on its own task
//! - a real entry while the stub is not connected: logged only
//! - no entry at all while the stub is not connected: the stub is wanted
//!
//! Then one wanted stub is connected, and every roster name absent from the
//! catalog is reported once as an unknown application.
//!
//! Passes never overlap: `reconcile()` holds a pass lock for its whole run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::launch_queue::LaunchQueue;
use crate::app::sniffed::SniffedAppCache;
use crate::app::stub::Stub;
use crate::catalog::StubCatalog;
use crate::config::NameMatching;
use crate::domain::{BrokerEvent, RosterEntry};
use crate::ports::{BusConnector, Clock, EventSink};

/// How one stub recognizes roster entries by display name.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    /// Falls back to exact matching when `name` is not a valid pattern.
    pub fn new(policy: NameMatching, name: &str) -> Self {
        match policy {
            NameMatching::Exact => Self::Exact(name.to_string()),
            NameMatching::Pattern => match Regex::new(&format!("^(?:{name})$")) {
                Ok(regex) => Self::Pattern(regex),
                Err(err) => {
                    warn!(stub = %name, error = %err, "stub name is not a valid pattern, matching exactly");
                    Self::Exact(name.to_string())
                }
            },
        }
    }

    pub fn matches(&self, display_name: &str) -> bool {
        match self {
            Self::Exact(name) => name == display_name,
            Self::Pattern(regex) => regex.is_match(display_name),
        }
    }
}

/// What one pass decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: u64,
    /// Stubs a forward was started for.
    pub forwarded: Vec<String>,
    /// Stubs newly added to the wanted set.
    pub wanted: Vec<String>,
    /// Stub connected at the end of the pass.
    pub connected: Option<String>,
    /// Names reported as unknown for the first time.
    pub unknown: Vec<String>,
}

pub struct HubReconciler {
    stubs: Vec<(Arc<Stub>, NameMatcher)>,
    catalog: Arc<StubCatalog>,
    bus: Arc<dyn BusConnector>,
    wanted: Arc<LaunchQueue>,
    sniffed: Arc<SniffedAppCache>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    passes: AtomicU64,
    /// held for a whole pass: passes never interleave, whoever runs them
    pass_lock: Mutex<()>,
}

pub struct ReconcilerParts {
    pub stubs: Vec<Arc<Stub>>,
    pub name_matching: NameMatching,
    pub catalog: Arc<StubCatalog>,
    pub bus: Arc<dyn BusConnector>,
    pub wanted: Arc<LaunchQueue>,
    pub sniffed: Arc<SniffedAppCache>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

impl HubReconciler {
    pub fn new(parts: ReconcilerParts) -> Self {
        let stubs = parts
            .stubs
            .into_iter()
            .map(|stub| {
                let matcher = NameMatcher::new(parts.name_matching, stub.name());
                (stub, matcher)
            })
            .collect();
        Self {
            stubs,
            catalog: parts.catalog,
            bus: parts.bus,
            wanted: parts.wanted,
            sniffed: parts.sniffed,
            events: parts.events,
            clock: parts.clock,
            passes: AtomicU64::new(0),
            pass_lock: Mutex::new(()),
        }
    }

    /// Passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Run one pass. Concurrent callers (the worker, `Broker::reconcile_now`)
    /// queue up behind the pass in progress.
    pub async fn reconcile(&self) -> PassReport {
        let _pass = self.pass_lock.lock().await;
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let roster = self.bus.list_clients().await;
        debug!(pass, clients = roster.len(), "reconciliation pass");

        let mut report = PassReport {
            pass,
            ..PassReport::default()
        };

        for (stub, matcher) in &self.stubs {
            self.reconcile_stub(pass, stub, matcher, &roster, &mut report);
        }

        if let Some(name) = self.wanted.take_next() {
            match self.stub(&name) {
                Some(stub) => {
                    info!(pass, stub = %name, remaining = self.wanted.len(), "connecting wanted stub");
                    stub.connect().await;
                    report.connected = Some(name);
                }
                None => warn!(pass, stub = %name, "wanted stub does not exist"),
            }
            self.wanted.settle();
        }

        self.report_unknown(pass, &roster, &mut report);
        report
    }

    fn reconcile_stub(
        &self,
        pass: u64,
        stub: &Arc<Stub>,
        matcher: &NameMatcher,
        roster: &[RosterEntry],
        report: &mut PassReport,
    ) {
        let connected = stub.is_connected();
        let mut matched = false;

        for entry in roster.iter().filter(|e| matcher.matches(&e.display_name)) {
            matched = true;
            if entry.is_stub_flagged() {
                continue;
            }

            if !connected {
                info!(pass, stub = %stub.name(), client = %entry.client_id, "real application present, stub retired");
                continue;
            }

            info!(pass, stub = %stub.name(), client = %entry.client_id, "real application arrived");
            if let Some(application) = self.sniffed.record(entry, self.clock.now()) {
                self.events.emit(BrokerEvent::ApplicationSniffed { application });
            }

            let stub = Arc::clone(stub);
            let recipient = entry.client_id.clone();
            tokio::spawn(async move {
                stub.forward(&recipient).await;
            });
            report.forwarded.push(entry.display_name.clone());
        }

        if !matched && !connected && self.wanted.want(stub.name()) {
            info!(pass, stub = %stub.name(), "stub wanted");
            report.wanted.push(stub.name().to_string());
        }
    }

    fn report_unknown(&self, pass: u64, roster: &[RosterEntry], report: &mut PassReport) {
        for entry in roster {
            if entry.display_name.is_empty() || self.catalog.is_known(&entry.display_name) {
                continue;
            }
            if let Some(application) = self.sniffed.record(entry, self.clock.now()) {
                info!(pass, application = %application.name, client = %entry.client_id, "unknown application discovered");
                report.unknown.push(application.name.clone());
                self.events.emit(BrokerEvent::UnknownApplication { application });
            }
        }
    }

    fn stub(&self, name: &str) -> Option<&Arc<Stub>> {
        self.stubs
            .iter()
            .map(|(stub, _)| stub)
            .find(|stub| stub.name() == name)
    }
}
