//! Status - ブローカーの状態スナップショット
//!
//! Serializable views for the CLI and any monitoring collaborator. Values are
//! read without taking stub locks, so a snapshot taken during a transition
//! may mix before and after.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::StubState;

/// Point-in-time view of one stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubStatus {
    pub name: String,
    pub state: StubState,
    pub connected: bool,
    pub pending: usize,
    pub launch_outstanding: bool,
    pub forwarded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatus {
    pub stubs: Vec<StubStatus>,
    /// Stubs waiting to be connected, in drain order.
    pub wanted: Vec<String>,
    pub sniffed: Vec<String>,
    pub state_counts: BTreeMap<StubState, usize>,
    pub passes: u64,
}

impl BrokerStatus {
    pub fn new(stubs: Vec<StubStatus>, wanted: Vec<String>, sniffed: Vec<String>, passes: u64) -> Self {
        let mut state_counts = BTreeMap::new();
        for stub in &stubs {
            *state_counts.entry(stub.state).or_insert(0) += 1;
        }
        Self {
            stubs,
            wanted,
            sniffed,
            state_counts,
            passes,
        }
    }

    pub fn count(&self, state: StubState) -> usize {
        self.state_counts.get(&state).copied().unwrap_or(0)
    }

    pub fn stub(&self, name: &str) -> Option<&StubStatus> {
        self.stubs.iter().find(|s| s.name == name)
    }
}
