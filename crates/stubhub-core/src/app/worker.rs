//! Workers - 調停ワーカーと受信ディスパッチワーカー
//!
//! - reconciliation worker: one pass per batch of roster notifications, never
//!   two passes at once
//! - dispatch worker: routes inbound messages onto per-stub lanes, so each
//!   stub sees its own traffic in arrival order
//!
//! Forwards run on their own tasks (spawned by the reconciler) so a
//! pre-forward delay never holds up reconciliation, and a stub busy
//! forwarding only blocks its own lane.

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::dispatch::{DispatchTable, StubLanes};
use crate::app::reconciler::HubReconciler;
use crate::domain::InboundMessage;
use crate::ports::RosterChange;

/// Worker group handle.
/// - `request_shutdown()` (or dropping the group) stops both workers after
///   their current step
/// - `shutdown_and_join()` waits for them to finish
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(
        reconciler: Arc<HubReconciler>,
        roster: broadcast::Receiver<RosterChange>,
        dispatch: Arc<DispatchTable>,
        inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconcile = tokio::spawn(reconcile_loop(reconciler, roster, shutdown_rx.clone()));
        let dispatch = tokio::spawn(dispatch_loop(dispatch, inbound, shutdown_rx));

        Self {
            shutdown_tx,
            joins: vec![reconcile, dispatch],
        }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn reconcile_loop(
    reconciler: Arc<HubReconciler>,
    mut roster: broadcast::Receiver<RosterChange>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let change = tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: the group is gone
                if changed.is_err() {
                    break;
                }
                continue;
            }
            change = roster.recv() => change,
        };

        match change {
            Ok(change) => debug!(?change, "roster changed"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "roster notifications lagged, reconciling from a fresh snapshot")
            }
            Err(RecvError::Closed) => {
                info!("roster notifications closed, reconciliation stopped");
                break;
            }
        }

        // 溜まった通知は1回のパスでまとめて処理する
        let coalesced = drain_pending(&mut roster);
        if coalesced > 0 {
            debug!(coalesced, "coalesced roster notifications");
        }

        let report = reconciler.reconcile().await;
        debug!(?report, "reconciliation pass done");
    }
}

fn drain_pending(roster: &mut broadcast::Receiver<RosterChange>) -> usize {
    let mut drained = 0;
    loop {
        match roster.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => drained += 1,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
        }
    }
}

async fn dispatch_loop(
    dispatch: Arc<DispatchTable>,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut lanes = StubLanes::new();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let message = tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: the group is gone
                if changed.is_err() {
                    break;
                }
                continue;
            }
            message = inbound.recv() => message,
        };

        let Some(message) = message else {
            info!("inbound channel closed, dispatch stopped");
            break;
        };

        match dispatch.route(&message) {
            Ok(stub) => {
                debug!(stub = %stub.name(), sender = %message.sender, mtype = %message.message.mtype, "dispatching inbound message");
                lanes.push(&stub, message.message);
            }
            Err(err) => warn!(error = %err, "inbound message dropped"),
        }
    }

    lanes.close().await;
}
