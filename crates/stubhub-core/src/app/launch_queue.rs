//! LaunchQueue - 接続待ちスタブの集合
//!
//! Names of stubs that want to (re)connect. Set semantics: wanting a name
//! twice keeps one entry. The reconciler drains one name per pass; the name
//! it took counts as pending until `settle()`, so waiters never observe
//! "empty" while the last connect is still running.
//!
//! The pending count is published on a watch channel so callers can wait
//! for the set to become empty without spinning.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::domain::BrokerError;

#[derive(Default)]
struct Wanted {
    names: VecDeque<String>,
    in_flight: Option<String>,
}

impl Wanted {
    fn pending(&self) -> usize {
        self.names.len() + usize::from(self.in_flight.is_some())
    }
}

pub struct LaunchQueue {
    wanted: Mutex<Wanted>,
    pending: watch::Sender<usize>,
}

impl LaunchQueue {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            wanted: Mutex::new(Wanted::default()),
            pending,
        }
    }

    /// Add `name`; returns `false` if it was already wanted.
    pub fn want(&self, name: &str) -> bool {
        let mut wanted = self.wanted.lock();
        if wanted.names.iter().any(|n| n == name) {
            return false;
        }
        wanted.names.push_back(name.to_string());
        self.pending.send_replace(wanted.pending());
        true
    }

    /// Remove and return one wanted name; it stays pending until `settle()`.
    pub fn take_next(&self) -> Option<String> {
        let mut wanted = self.wanted.lock();
        let next = wanted.names.pop_front();
        if next.is_some() {
            wanted.in_flight = next.clone();
        }
        self.pending.send_replace(wanted.pending());
        next
    }

    /// The name taken last has been dealt with.
    pub fn settle(&self) {
        let mut wanted = self.wanted.lock();
        wanted.in_flight = None;
        self.pending.send_replace(wanted.pending());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.wanted.lock().names.iter().any(|n| n == name)
    }

    /// Names still waiting to be taken.
    pub fn len(&self) -> usize {
        self.wanted.lock().names.len()
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.wanted.lock().pending() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.wanted.lock().names.iter().cloned().collect()
    }

    /// Resolve once nothing is wanted.
    ///
    /// Wakes on every change and re-checks at least every `poll`. `None`
    /// waits without bound.
    pub async fn wait_until_empty(
        &self,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut rx = self.pending.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == 0 {
                    return;
                }
                tokio::select! {
                    _ = rx.changed() => {}
                    () = tokio::time::sleep(poll) => {}
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| BrokerError::Timeout(limit)),
            None => {
                wait.await;
                Ok(())
            }
        }
    }
}

impl Default for LaunchQueue {
    fn default() -> Self {
        Self::new()
    }
}
