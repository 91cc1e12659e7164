//! Stub - 未起動アプリケーションの身代わりクライアント
//!
//! One `Stub` per catalog descriptor. It registers on the bus under the
//! application's name, queues whatever is sent to it, starts the real
//! application and, once the reconciler reports the real client, replays the
//! queue to it and leaves the bus.
//!
//! # Locking
//! - `inner` (async mutex) serializes every transition of one stub,
//!   including the awaits on the bus and the pre-forward delay.
//! - `progress` (watch) and `shadow` mirror what readers need without taking
//!   `inner`, so `is_connected()` and `status()` never wait behind a forward.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::app::status::StubStatus;
use crate::domain::{
    BrokerError, BrokerEvent, BusError, ClientId, ClientMetadata, ConnectionId, LaunchId, Message,
    MessageType, StubDescriptor, StubProgress, StubState,
};
use crate::ports::{BusConnector, Clock, EventSink, LaunchOutcome, LaunchStatus, ProcessLauncher};

/// Collaborators shared by every stub of one broker.
#[derive(Clone)]
pub struct StubContext {
    pub bus: Arc<dyn BusConnector>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

/// State guarded by the per-stub lock.
#[derive(Default)]
struct StubInner {
    pending: VecDeque<Message>,
    active_launch: Option<LaunchId>,
    connection: Option<ConnectionId>,
}

/// Lock-free mirror of `StubInner` for readers.
#[derive(Debug, Clone, Copy, Default)]
struct Shadow {
    pending: usize,
    active_launch: Option<LaunchId>,
    connection: Option<ConnectionId>,
}

pub struct Stub {
    descriptor: StubDescriptor,
    metadata: ClientMetadata,
    prelaunch_delay: Duration,
    ctx: StubContext,
    inner: Mutex<StubInner>,
    progress: watch::Sender<StubProgress>,
    shadow: SyncMutex<Shadow>,
}

impl Stub {
    pub fn new(descriptor: StubDescriptor, prelaunch_delay: Duration, ctx: StubContext) -> Self {
        let metadata = ClientMetadata::for_stub(&descriptor);
        let (progress, _) = watch::channel(StubProgress::new());
        Self {
            descriptor,
            metadata,
            prelaunch_delay,
            ctx,
            inner: Mutex::new(StubInner::default()),
            progress,
            shadow: SyncMutex::new(Shadow::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &StubDescriptor {
        &self.descriptor
    }

    pub fn capabilities(&self) -> &[MessageType] {
        &self.descriptor.capabilities
    }

    pub fn launch_locator(&self) -> &str {
        &self.descriptor.launch_locator
    }

    pub fn state(&self) -> StubState {
        self.progress.borrow().state
    }

    pub fn progress(&self) -> StubProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StubProgress> {
        self.progress.subscribe()
    }

    /// Current bus connection, if registered.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.shadow.lock().connection
    }

    /// Registered on the bus and the bus still reports the connection live.
    pub fn is_connected(&self) -> bool {
        if !self.state().holds_registration() {
            return false;
        }
        self.connection()
            .is_some_and(|connection| self.ctx.bus.is_active(connection))
    }

    pub fn status(&self) -> StubStatus {
        let progress = self.progress();
        let shadow = *self.shadow.lock();
        StubStatus {
            name: self.name().to_string(),
            state: progress.state,
            connected: self.is_connected(),
            pending: shadow.pending,
            launch_outstanding: shadow.active_launch.is_some(),
            forwarded: progress.forwarded,
            failed: progress.failed,
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Register on the bus and declare capabilities.
    ///
    /// Only acts from `Undefined` or `Dying`; concurrent callers collapse to
    /// one attempt. A registration failure ends in `Dying` so the next
    /// `connect()` retries.
    pub async fn connect(&self) {
        let mut inner = self.inner.lock().await;
        let state = self.state();
        if !state.is_connectable() {
            debug!(stub = %self.name(), %state, "connect ignored");
            return;
        }

        self.set_state(StubState::Initializing);
        if let Err(err) = self.connect_to_bus(&mut inner).await {
            warn!(stub = %self.name(), error = %err, "could not register on the bus");
            self.disconnect_locked(&mut inner).await;
        }
    }

    async fn connect_to_bus(&self, inner: &mut StubInner) -> Result<(), BusError> {
        self.set_state(StubState::Connecting);
        let connection = self.ctx.bus.register(&self.metadata).await?;
        inner.connection = Some(connection);
        self.sync_shadow(inner);
        info!(stub = %self.name(), %connection, "registered on the bus");

        self.set_state(StubState::Registering);
        self.ctx
            .bus
            .declare_capabilities(connection, self.capabilities())
            .await?;
        debug!(stub = %self.name(), capabilities = ?self.capabilities(), "declared capabilities");

        self.set_state(StubState::Listening);
        Ok(())
    }

    /// Leave the bus. Idempotent: a no-op unless the stub holds a registration.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.disconnect_locked(&mut inner).await;
    }

    async fn disconnect_locked(&self, inner: &mut StubInner) {
        let state = self.state();
        if !state.holds_registration() {
            debug!(stub = %self.name(), %state, "disconnect ignored");
            return;
        }

        self.set_state(StubState::Disconnecting);
        if let Some(connection) = inner.connection.take() {
            self.ctx.bus.deregister(connection).await;
        }
        self.set_state(StubState::Dying);

        if !inner.pending.is_empty() {
            self.report_undelivered(inner, "stub disconnected");
        }
        inner.pending.clear();
        inner.active_launch = None;
        self.sync_shadow(inner);
        info!(stub = %self.name(), "disconnected");
    }

    /// Queue `message` and start the real application unless a launch is
    /// already outstanding.
    ///
    /// Returns `false` (and reports the message as undelivered) when the
    /// stub is not listening.
    pub async fn receive(self: &Arc<Self>, message: Message) -> bool {
        let mut inner = self.inner.lock().await;
        let state = self.state();
        if !state.accepts_traffic() {
            warn!(stub = %self.name(), %state, mtype = %message.mtype, "message refused: stub not listening");
            self.emit_undelivered(vec![message], "stub not listening");
            return false;
        }

        info!(stub = %self.name(), mtype = %message.mtype, "queued message");
        inner.pending.push_back(message);
        self.sync_shadow(&inner);

        if inner.active_launch.is_none() {
            self.launch_locked(&mut inner).await;
        }
        true
    }

    /// Start the real application.
    ///
    /// Moves to `Launching` only when connected; the launch itself is always
    /// requested. Further requests are ignored until the launch resolves.
    pub async fn launch_real_application(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        self.launch_locked(&mut inner).await;
    }

    async fn launch_locked(self: &Arc<Self>, inner: &mut StubInner) {
        if let Some(launch) = inner.active_launch {
            debug!(stub = %self.name(), %launch, "launch already outstanding");
            return;
        }

        // a relaunch after a successful start is already `Launching`
        if self.is_connected() && self.state() != StubState::Launching {
            self.set_state(StubState::Launching);
        }

        info!(stub = %self.name(), locator = %self.launch_locator(), "starting real application");
        match self.ctx.launcher.launch(self.launch_locator()).await {
            Ok(ticket) => {
                inner.active_launch = Some(ticket.id);
                self.sync_shadow(inner);

                let stub = Arc::clone(self);
                tokio::spawn(async move {
                    // sender が drop されたらプロセスを見失ったとみなす
                    let outcome = ticket
                        .completion
                        .await
                        .unwrap_or_else(|_| LaunchOutcome::new(LaunchStatus::Killed));
                    stub.on_process_completed(ticket.id, outcome).await;
                });
            }
            Err(err) => {
                error!(stub = %self.name(), error = %err, "launch failed to start");
                self.fail_locked(inner, &err.to_string());
            }
        }
    }

    /// Completion callback for launch `launch`.
    ///
    /// Success only clears the handle: the reconciler moves on once the real
    /// client shows up. Anything else discards the queue and goes back to
    /// `Listening`. Completions of a launch that is no longer the active one
    /// (killed, or cleared by a disconnect) are ignored.
    pub async fn on_process_completed(&self, launch: LaunchId, outcome: LaunchOutcome) {
        let mut inner = self.inner.lock().await;
        if inner.active_launch != Some(launch) {
            debug!(stub = %self.name(), %launch, status = ?outcome.status, "stale launch completion ignored");
            return;
        }

        for line in &outcome.output {
            debug!(stub = %self.name(), %launch, "process: {line}");
        }

        if outcome.is_success() {
            info!(stub = %self.name(), exit_code = ?outcome.exit_code, "real application started");
            inner.active_launch = None;
            self.sync_shadow(&inner);
        } else {
            error!(stub = %self.name(), status = ?outcome.status, exit_code = ?outcome.exit_code, "real application failed to start");
            let reason = format!("launch {:?}", outcome.status).to_lowercase();
            self.fail_locked(&mut inner, &reason);
        }
    }

    /// Cancel the outstanding launch, then clean up as for a failed one.
    pub async fn kill_real_application(&self) {
        let mut inner = self.inner.lock().await;
        let Some(launch) = inner.active_launch else {
            debug!(stub = %self.name(), "no launch to kill");
            return;
        };

        info!(stub = %self.name(), %launch, "killing real application launch");
        self.ctx.launcher.cancel(launch).await;
        self.fail_locked(&mut inner, "launch killed");
    }

    /// Replay the queue to `recipient`, then leave the bus.
    ///
    /// Send failures are logged and do not stop the batch. The stub is
    /// single-use per appearance of the real application: it is re-armed by
    /// a later `connect()`.
    pub async fn forward(&self, recipient: &ClientId) {
        let mut inner = self.inner.lock().await;
        let state = self.state();
        if !state.accepts_traffic() {
            debug!(stub = %self.name(), %state, %recipient, "forward ignored");
            return;
        }

        info!(stub = %self.name(), %recipient, "real application found");
        if inner.pending.is_empty() {
            info!(stub = %self.name(), "nothing to forward");
        } else {
            self.set_state(StubState::Seeking);
            if !self.prelaunch_delay.is_zero() {
                info!(stub = %self.name(), delay = ?self.prelaunch_delay, "waiting before forwarding");
                tokio::time::sleep(self.prelaunch_delay).await;
            }

            self.set_state(StubState::Forwarding);
            let batch: Vec<Message> = inner.pending.drain(..).collect();
            self.sync_shadow(&inner);
            self.send_batch(inner.connection, recipient, &batch).await;
            self.progress.send_modify(|p| p.forwarded += 1);
        }

        self.disconnect_locked(&mut inner).await;
    }

    async fn send_batch(
        &self,
        connection: Option<ConnectionId>,
        recipient: &ClientId,
        batch: &[Message],
    ) {
        let Some(connection) = connection else {
            warn!(stub = %self.name(), "no bus connection left to forward with");
            self.emit_undelivered(batch.to_vec(), "no bus connection");
            return;
        };

        let total = batch.len();
        for (index, message) in batch.iter().enumerate() {
            match self.ctx.bus.send(connection, recipient, message).await {
                Ok(()) => {
                    info!(stub = %self.name(), %recipient, "forwarded message ({}/{})", index + 1, total)
                }
                Err(err) => {
                    warn!(stub = %self.name(), %recipient, error = %err, "forwarding message ({}/{}) failed", index + 1, total)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Wait until one more forward cycle completes than in `since`.
    ///
    /// Fails with `LaunchFailed` if a launch failure is seen first.
    pub async fn wait_for_outcome(
        &self,
        since: StubProgress,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let mut rx = self.progress.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|p| p.forwarded > since.forwarded || p.failed > since.failed),
        )
        .await
        .map_err(|_| BrokerError::Timeout(timeout))?;

        let progress = *waited.map_err(|_| BrokerError::ShutDown)?;
        if progress.forwarded > since.forwarded {
            Ok(())
        } else {
            Err(BrokerError::LaunchFailed(self.name().to_string()))
        }
    }

    /// `wait_for_outcome` from the current progress.
    pub async fn wait_for_success(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.wait_for_outcome(self.progress(), timeout).await
    }

    /// Wait until the stub reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: StubState,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let mut rx = self.progress.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|p| p.state == state))
            .await
            .map_err(|_| BrokerError::Timeout(timeout))?
            .map(|_| ())
            .map_err(|_| BrokerError::ShutDown)
    }

    // ------------------------------------------------------------------
    // Helpers (caller holds `inner`)
    // ------------------------------------------------------------------

    fn fail_locked(&self, inner: &mut StubInner, reason: &str) {
        let registered = self.state().accepts_traffic();
        if registered {
            self.set_state(StubState::Failing);
        }

        if !inner.pending.is_empty() {
            self.report_undelivered(inner, reason);
        }
        inner.pending.clear();
        inner.active_launch = None;
        self.sync_shadow(inner);
        self.progress.send_modify(|p| p.failed += 1);

        if registered {
            self.set_state(StubState::Listening);
        }
    }

    fn report_undelivered(&self, inner: &StubInner, reason: &str) {
        error!(stub = %self.name(), count = inner.pending.len(), %reason, "unable to deliver queued messages");
        for message in &inner.pending {
            error!(stub = %self.name(), "undelivered: {message}");
        }
        self.emit_undelivered(inner.pending.iter().cloned().collect(), reason);
    }

    fn emit_undelivered(&self, messages: Vec<Message>, reason: &str) {
        self.ctx.events.emit(BrokerEvent::MessagesUndelivered {
            stub: self.name().to_string(),
            messages,
            reason: reason.to_string(),
            at: self.ctx.clock.now(),
        });
    }

    fn set_state(&self, state: StubState) {
        self.progress.send_modify(|p| p.state = state);
        info!(stub = %self.name(), %state, "state changed");
        self.ctx.events.emit(BrokerEvent::StateChanged {
            stub: self.name().to_string(),
            state,
            at: self.ctx.clock.now(),
        });
    }

    fn sync_shadow(&self, inner: &StubInner) {
        *self.shadow.lock() = Shadow {
            pending: inner.pending.len(),
            active_launch: inner.active_launch,
            connection: inner.connection,
        };
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stub")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
